use std::path::Path;

/// Source flavour used to pick structural split points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    Go,
    Markdown,
    Text,
}

const RUST: &[&str] = &[
    "\npub fn ", "\nfn ", "\nimpl ", "\npub struct ", "\nstruct ", "\npub enum ", "\nenum ",
    "\ntrait ", "\nmod ", "\n\n", "\n", " ", "",
];
const PYTHON: &[&str] = &["\nclass ", "\ndef ", "\n\tdef ", "\n    def ", "\n\n", "\n", " ", ""];
const JAVASCRIPT: &[&str] = &[
    "\nexport ", "\nfunction ", "\nclass ", "\nconst ", "\nlet ", "\nvar ", "\nif ", "\nfor ",
    "\nwhile ", "\nswitch ", "\n\n", "\n", " ", "",
];
const GO: &[&str] = &["\nfunc ", "\ntype ", "\nvar ", "\nconst ", "\n\n", "\n", " ", ""];
const MARKDOWN: &[&str] = &[
    "\n# ", "\n## ", "\n### ", "\n#### ", "\n```", "\n\n", "\n", " ", "",
];
const TEXT: &[&str] = &["\n\n", "\n", " ", ""];

impl Language {
    #[must_use]
    pub fn detect(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("rs") => Self::Rust,
            Some("py" | "pyi") => Self::Python,
            Some("js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" | "mts" | "cts") => Self::JavaScript,
            Some("go") => Self::Go,
            Some("md" | "markdown") => Self::Markdown,
            _ => Self::Text,
        }
    }

    /// Split points in priority order, ending with the empty per-character fallback.
    #[must_use]
    pub fn separators(self) -> &'static [&'static str] {
        match self {
            Self::Rust => RUST,
            Self::Python => PYTHON,
            Self::JavaScript => JAVASCRIPT,
            Self::Go => GO,
            Self::Markdown => MARKDOWN,
            Self::Text => TEXT,
        }
    }
}
