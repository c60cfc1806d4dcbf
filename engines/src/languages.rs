//! Languages both engines can be asked to compare, with each engine's exact
//! wire name and the source extensions used to pre-filter extraction.
//! Common aliases are accepted in config JSON (e.g., "cc", "c++", "c#").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    #[serde(alias = "cc", alias = "c++")]
    Cpp,
    Java,
    Python,
    #[serde(alias = "c#")]
    CSharp,
    Scheme,
    Haskell,
    /// Fallback for anything without dedicated engine support.
    Text,
}

impl Language {
    /// Exact language string required by the socket engine.
    pub fn to_moss(self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cc",
            Language::Java => "java",
            Language::Python => "python",
            Language::CSharp => "csharp",
            Language::Scheme => "scheme",
            Language::Haskell => "haskell",
            Language::Text => "ascii",
        }
    }

    /// Exact language string required by the RPC engine, when supported.
    pub fn to_jplag(self) -> Option<&'static str> {
        match self {
            Language::C | Language::Cpp => Some("c/c++"),
            Language::Java => Some("java"),
            Language::Python => Some("python3"),
            Language::CSharp => Some("c#"),
            Language::Scheme => Some("scheme"),
            Language::Text => Some("text"),
            Language::Haskell => None,
        }
    }

    /// Source-file extensions considered part of a submission.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Language::C => &["c", "h"],
            Language::Cpp => &["cpp", "cc", "cxx", "hpp", "hh", "h"],
            Language::Java => &["java"],
            Language::Python => &["py"],
            Language::CSharp => &["cs"],
            Language::Scheme => &["scm", "ss"],
            Language::Haskell => &["hs", "lhs"],
            Language::Text => &["txt"],
        }
    }
}

/// Everything the socket engine accepts.
pub const MOSS_LANGUAGES: &[Language] = &[
    Language::C,
    Language::Cpp,
    Language::Java,
    Language::Python,
    Language::CSharp,
    Language::Scheme,
    Language::Haskell,
    Language::Text,
];

/// Subset the RPC engine accepts.
pub const JPLAG_LANGUAGES: &[Language] = &[
    Language::C,
    Language::Cpp,
    Language::Java,
    Language::Python,
    Language::CSharp,
    Language::Scheme,
    Language::Text,
];
