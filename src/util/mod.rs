mod code;
mod logger;
mod position;

use once_cell::unsync::OnceCell;

/// Line and column of a byte position in a [Code], both 1-based.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// A wrapper around the source bytes giving `O(log n)` line/column lookup.
///
/// Newline offsets are computed lazily on first use and cached; every
/// [TextRange](crate::text::TextRange) derived from a `Code` borrows its bytes.
pub struct Code<'c> {
    pub value: &'c [u8],
    line_breaks: OnceCell<Vec<usize>>,
}

/// Debug-only trace levels for lexeme/NFA/CYK diagnostics.
///
/// Ordered `None < Default < Success < Result < Verbose`; callers pick a level and
/// every message at or below it is printed. Compiled out entirely in release builds.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Log<T> {
    None,
    Default(T),
    Success(T),
    Result(T),
    Verbose(T),
}
