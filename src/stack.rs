//! Call-stack inspection used to find who invoked a marker.
//!
//! Frames are listed innermost first. The recorder hands [`caller_key`] a
//! predicate recognising its own entry points; everything above the last
//! of those is the instrumented code.
use crate::key::{LocationKey, SymbolPath};

/// One resolved symbol on the stack. Inlined calls produce their own frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    /// Demangled symbol name, without the legacy hash suffix.
    pub symbol: Option<String>,
    pub line: Option<u32>,
}

impl Frame {
    pub fn new(symbol: impl Into<String>, line: u32) -> Self {
        Self {
            symbol: Some(symbol.into()),
            line: Some(line),
        }
    }

    pub fn path(&self) -> Option<SymbolPath> {
        self.symbol.as_deref().and_then(SymbolPath::parse)
    }
}

/// Something that can list the frames of the current call stack.
pub trait CallStack {
    fn frames(&self) -> Vec<Frame>;
}

/// A fixed list of frames, mostly useful in tests.
impl CallStack for Vec<Frame> {
    fn frames(&self) -> Vec<Frame> {
        self.clone()
    }
}

/// Live capture of the calling thread's stack through the `backtrace` crate.
///
/// Symbol names and line numbers come from debug info; a build without it
/// yields frames with no line, which never produce a key.
#[derive(Debug, Default, Clone, Copy)]
pub struct BacktraceStack;

impl CallStack for BacktraceStack {
    #[inline(never)]
    fn frames(&self) -> Vec<Frame> {
        let mut frames = Vec::new();
        backtrace::trace(|raw| {
            let before = frames.len();
            backtrace::resolve_frame(raw, |symbol| {
                frames.push(Frame {
                    symbol: symbol.name().map(|name| format!("{name:#}")),
                    line: symbol.lineno(),
                });
            });
            // Keep unresolved frames as placeholders so "the next frame"
            // never skips past an unknown caller.
            if frames.len() == before {
                frames.push(Frame::default());
            }
            true
        });
        frames
    }
}

/// The frame directly above the marker's own entry point.
///
/// Frames are skipped until the first one matching `is_marker`; any marker
/// frames immediately following it (one entry point forwarding to another)
/// are skipped too. Returns `None` when no marker frame is present or
/// nothing sits above it.
pub fn caller_frame<F>(frames: &[Frame], is_marker: F) -> Option<&Frame>
where
    F: Fn(&Frame) -> bool,
{
    let first = frames.iter().position(&is_marker)?;
    frames[first..].iter().find(|frame| !is_marker(*frame))
}

/// The location key of the marker's caller, if it can be derived.
pub fn caller_key<F>(frames: &[Frame], is_marker: F) -> Option<LocationKey>
where
    F: Fn(&Frame) -> bool,
{
    let frame = caller_frame(frames, is_marker)?;
    LocationKey::from_symbol(frame.symbol.as_deref()?, frame.line?)
}
