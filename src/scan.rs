//! Static discovery of marker call sites.
//!
//! Every `.rs` file under a root is parsed with `syn`. Inside each `impl`
//! block (and each trait with default method bodies) the scanner looks for
//! calls named `sample`, whether written as a path call (`covmark::sample()`)
//! or a method call (`session.sample()`). The match is purely on the name:
//! any function or method called `sample` counts as a marker.
//!
//! The AST is only used for positions. Method text is sliced out of the
//! original file by line range so blank lines and formatting survive and
//! line numbers agree with what the parser reported.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use proc_macro2::{Delimiter, Span, TokenStream, TokenTree};
use syn::ext::IdentExt;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::visit::{self, Visit};
use syn::Token;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{CovmarkError, Result};
use crate::model::{CoverageIndex, MarkerSite, MethodBody, MethodCoverage};

/// Name of the marker function.
pub const MARKER_NAME: &str = "sample";

/// Extension of the files the scanner reads.
pub const SOURCE_EXTENSION: &str = "rs";

/// How many files a scan read and how many it had to skip.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub files_scanned: usize,
    pub files_skipped: usize,
}

/// Scan every source file under `root` into a [`CoverageIndex`].
pub fn scan(root: &Path) -> Result<CoverageIndex> {
    scan_with_stats(root).map(|(index, _)| index)
}

/// Like [`scan`], also reporting how many files were read or skipped.
///
/// A file that fails to parse is logged and skipped. Failing to walk the
/// tree or read a file is fatal.
pub fn scan_with_stats(root: &Path) -> Result<(CoverageIndex, ScanStats)> {
    let mut index = CoverageIndex::new();
    let mut stats = ScanStats::default();

    for path in source_files(root)? {
        match scan_file(&path) {
            Ok(methods) => {
                stats.files_scanned += 1;
                for method in methods {
                    index.insert(method);
                }
            }
            Err(CovmarkError::Parse { path, message }) => {
                warn!(path = %path.display(), %message, "skipping unparsable source file");
                stats.files_skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        root = %root.display(),
        scanned = stats.files_scanned,
        skipped = stats.files_skipped,
        markers = index.marker_count(),
        "scan complete"
    );
    Ok((index, stats))
}

/// All source files under `root`, sorted by name at each level so repeated
/// scans see them in the same order.
pub fn source_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source root {} is not a directory", root.display()),
        )
        .into());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        let is_source = entry
            .path()
            .extension()
            .is_some_and(|ext| ext == SOURCE_EXTENSION);
        if entry.file_type().is_file() && is_source {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Scan a single file. Invalid UTF-8 is reported as a parse failure.
pub fn scan_file(path: &Path) -> Result<Vec<MethodCoverage>> {
    let bytes = fs::read(path)?;
    let source = String::from_utf8(bytes).map_err(|e| CovmarkError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    debug!(path = %path.display(), "scanning");
    scan_source(&source, path)
}

/// Scan source text. `path` is only recorded on the resulting bodies.
///
/// Spans created on this thread before the call are invalidated once the
/// file has been scanned; the line table proc-macro2 keeps per thread would
/// otherwise grow with every file.
pub fn scan_source(source: &str, path: &Path) -> Result<Vec<MethodCoverage>> {
    let methods = match syn::parse_file(source) {
        Ok(file) => {
            let mut visitor = MarkerVisitor::new(source, path);
            visitor.visit_file(&file);
            Ok(visitor.methods)
        }
        Err(e) => Err(CovmarkError::Parse {
            path: path.to_path_buf(),
            message: format!("{e} (line {})", e.span().start().line),
        }),
    };
    proc_macro2::extra::invalidate_current_thread_spans();
    methods
}

/// Lines `start..=end` (1-based) of `source`, exactly as written.
/// Line endings are dropped; blank lines come back as empty strings.
pub fn extract_lines(source: &str, start: u32, end: u32) -> Vec<String> {
    if start == 0 || end < start {
        return Vec::new();
    }
    source
        .lines()
        .skip(start as usize - 1)
        .take((end - start + 1) as usize)
        .map(str::to_owned)
        .collect()
}

/// Simple name of the type an `impl` block targets, if it has one.
fn type_name(ty: &syn::Type) -> Option<String> {
    match ty {
        syn::Type::Path(p) => p.path.segments.last().map(|s| s.ident.unraw().to_string()),
        syn::Type::Reference(r) => type_name(&r.elem),
        syn::Type::Paren(p) => type_name(&p.elem),
        syn::Type::Group(g) => type_name(&g.elem),
        syn::Type::TraitObject(t) => t.bounds.iter().find_map(|bound| match bound {
            syn::TypeParamBound::Trait(tb) => {
                tb.path.segments.last().map(|s| s.ident.unraw().to_string())
            }
            _ => None,
        }),
        _ => None,
    }
}

fn line_of(span: Span) -> u32 {
    span.start().line as u32
}

/// First line of a method: its visibility if written, else its signature.
/// Attributes and doc comments are not part of the body.
fn first_line(vis: Option<&syn::Visibility>, sig: &syn::Signature) -> u32 {
    match vis {
        Some(vis) if !matches!(vis, syn::Visibility::Inherited) => line_of(vis.span()),
        _ => line_of(sig.span()),
    }
}

fn last_line(block: &syn::Block) -> u32 {
    block.brace_token.span.close().end().line as u32
}

/// A method being visited.
struct OpenMethod {
    class: String,
    name: String,
    start_line: u32,
    end_line: u32,
    calls: Vec<u32>,
}

struct MarkerVisitor<'a> {
    source: &'a str,
    path: &'a Path,
    /// Enclosing `impl`/`trait` names; `None` for impls we cannot key.
    owners: Vec<Option<String>>,
    /// Enclosing fn items; `None` marks a free fn, whose calls belong to no method.
    open: Vec<Option<OpenMethod>>,
    methods: Vec<MethodCoverage>,
}

impl<'a> MarkerVisitor<'a> {
    fn new(source: &'a str, path: &'a Path) -> Self {
        Self {
            source,
            path,
            owners: Vec::new(),
            open: Vec::new(),
            methods: Vec::new(),
        }
    }

    fn enter_method(&mut self, ident: &syn::Ident, start_line: u32, end_line: u32) {
        let method = match self.owners.last() {
            Some(Some(class)) => Some(OpenMethod {
                class: class.clone(),
                name: ident.unraw().to_string(),
                start_line,
                end_line,
                calls: Vec::new(),
            }),
            _ => None,
        };
        self.open.push(method);
    }

    fn exit_method(&mut self) {
        if let Some(Some(method)) = self.open.pop() {
            if !method.calls.is_empty() {
                let coverage = self.finish(method);
                self.methods.push(coverage);
            }
        }
    }

    fn mark(&mut self, line: u32) {
        if let Some(Some(method)) = self.open.last_mut() {
            method.calls.push(line);
        }
    }

    /// Marker calls in a macro body that does not parse as expressions:
    /// any `sample` identifier directly followed by a parenthesized group,
    /// except where it names a `fn`.
    fn mark_tokens(&mut self, tokens: TokenStream) {
        let mut after_fn = false;
        let mut iter = tokens.into_iter().peekable();
        while let Some(tree) = iter.next() {
            match &tree {
                TokenTree::Ident(ident) if ident == MARKER_NAME && !after_fn => {
                    let called = matches!(
                        iter.peek(),
                        Some(TokenTree::Group(g)) if g.delimiter() == Delimiter::Parenthesis
                    );
                    if called {
                        self.mark(line_of(ident.span()));
                    }
                }
                TokenTree::Group(group) => self.mark_tokens(group.stream()),
                _ => {}
            }
            after_fn = matches!(&tree, TokenTree::Ident(ident) if ident == "fn");
        }
    }

    fn finish(&self, mut method: OpenMethod) -> MethodCoverage {
        method.calls.sort_unstable();
        method.calls.dedup();
        debug_assert!(method
            .calls
            .iter()
            .all(|&line| (method.start_line..=method.end_line).contains(&line)));

        let sites = method
            .calls
            .iter()
            .map(|&line| MarkerSite {
                class: method.class.clone(),
                method: method.name.clone(),
                line,
            })
            .collect();

        MethodCoverage {
            body: MethodBody {
                source_lines: extract_lines(self.source, method.start_line, method.end_line),
                class: method.class,
                name: method.name,
                path: self.path.to_path_buf(),
                start_line: method.start_line,
                end_line: method.end_line,
            },
            sites,
        }
    }
}

impl<'ast> Visit<'ast> for MarkerVisitor<'_> {
    fn visit_item_impl(&mut self, node: &'ast syn::ItemImpl) {
        self.owners.push(type_name(&node.self_ty));
        visit::visit_item_impl(self, node);
        self.owners.pop();
    }

    fn visit_item_trait(&mut self, node: &'ast syn::ItemTrait) {
        self.owners.push(Some(node.ident.unraw().to_string()));
        visit::visit_item_trait(self, node);
        self.owners.pop();
    }

    fn visit_item_fn(&mut self, node: &'ast syn::ItemFn) {
        self.open.push(None);
        visit::visit_item_fn(self, node);
        self.open.pop();
    }

    fn visit_impl_item_fn(&mut self, node: &'ast syn::ImplItemFn) {
        let start = first_line(Some(&node.vis), &node.sig);
        self.enter_method(&node.sig.ident, start, last_line(&node.block));
        visit::visit_impl_item_fn(self, node);
        self.exit_method();
    }

    fn visit_trait_item_fn(&mut self, node: &'ast syn::TraitItemFn) {
        match &node.default {
            Some(block) => {
                let start = first_line(None, &node.sig);
                self.enter_method(&node.sig.ident, start, last_line(block));
                visit::visit_trait_item_fn(self, node);
                self.exit_method();
            }
            None => visit::visit_trait_item_fn(self, node),
        }
    }

    fn visit_expr_call(&mut self, node: &'ast syn::ExprCall) {
        if let syn::Expr::Path(callee) = &*node.func {
            let named_marker = callee
                .path
                .segments
                .last()
                .is_some_and(|segment| segment.ident == MARKER_NAME);
            if named_marker {
                self.mark(line_of(callee.span()));
            }
        }
        visit::visit_expr_call(self, node);
    }

    fn visit_expr_method_call(&mut self, node: &'ast syn::ExprMethodCall) {
        if node.method == MARKER_NAME {
            self.mark(line_of(node.method.span()));
        }
        visit::visit_expr_method_call(self, node);
    }

    /// Macro arguments are opaque tokens to `syn`; comma-separated
    /// expressions (`assert!`, `println!`, `vec!`) are parsed and visited,
    /// anything else is searched token by token.
    fn visit_macro(&mut self, node: &'ast syn::Macro) {
        let parser = Punctuated::<syn::Expr, Token![,]>::parse_terminated;
        match node.parse_body_with(parser) {
            Ok(exprs) => {
                for expr in &exprs {
                    Visit::visit_expr(self, expr);
                }
            }
            Err(_) => self.mark_tokens(node.tokens.clone()),
        }
        visit::visit_macro(self, node);
    }
}
