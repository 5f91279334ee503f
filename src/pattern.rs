//! Regex-based pattern switch.
//!
//! Compiles many independent patterns into one combined matcher so dispatch
//! over a large set of mutually exclusive fixed patterns costs one automaton
//! evaluation instead of N sequential tries.
//!
//! Each pattern source is wrapped in its own capturing group and all sources
//! are alternated into a single compiled expression. For every pattern the
//! switch records the capture-group offset it occupies (1 plus its own
//! internal group count, summed across prior patterns). On a match, the
//! first participating group starting from offset 1 identifies the owning
//! pattern, and only that pattern's capture range is sliced out, so capture
//! indices are relative to the pattern rather than the combined expression.

use regex::Regex;

/// Result of a successful switch match.
///
/// `captures[0]` is the text matched by the owning pattern as a whole;
/// subsequent entries are the pattern's own capturing groups, `None` for
/// groups that did not participate.
#[derive(Debug)]
pub struct SwitchMatch<'t, V> {
    /// Captures relative to the owning pattern.
    pub captures: Vec<Option<&'t str>>,
    /// Value associated with the owning pattern at compile time.
    pub value: &'t V,
}

struct SwitchEntry<V> {
    /// Index of this pattern's wrapping group in the combined expression.
    offset: usize,
    /// Number of capturing groups inside the pattern itself.
    groups: usize,
    value: V,
}

/// N independent patterns compiled into one evaluation pass.
pub struct PatternSwitch<V> {
    combined: Regex,
    entries: Vec<SwitchEntry<V>>,
}

impl<V> PatternSwitch<V> {
    /// Compile an ordered sequence of `(pattern, value)` pairs.
    ///
    /// Pattern order is match priority: when more than one pattern could
    /// match, the alternation picks the earliest.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`regex::Error`] when a pattern source does
    /// not compile.
    pub fn compile(patterns: Vec<(String, V)>) -> Result<Self, regex::Error> {
        let mut entries = Vec::with_capacity(patterns.len());
        let mut sources = Vec::with_capacity(patterns.len());
        let mut offset = 1usize;
        for (source, value) in patterns {
            // Compile the pattern alone to learn its capture-group count.
            let groups = Regex::new(&source)?.captures_len() - 1;
            entries.push(SwitchEntry {
                offset,
                groups,
                value,
            });
            offset += groups + 1;
            sources.push(format!("({source})"));
        }
        let combined = Regex::new(&sources.join("|"))?;
        Ok(Self { combined, entries })
    }

    /// Match an input against the switch.
    ///
    /// Returns the owning pattern's captures and its associated value, or
    /// `None` when nothing matched. No match is not an error.
    #[must_use]
    pub fn match_input<'t>(&'t self, input: &'t str) -> Option<SwitchMatch<'t, V>> {
        let caps = self.combined.captures(input)?;
        // The first participating group is always a wrapping group, since a
        // pattern's wrapping group precedes its internal groups.
        let first = (1..caps.len()).find(|&i| caps.get(i).is_some())?;
        let entry = self.entries.iter().find(|e| e.offset == first)?;
        let captures = (entry.offset..=entry.offset + entry.groups)
            .map(|i| caps.get(i).map(|m| m.as_str()))
            .collect();
        Some(SwitchMatch {
            captures,
            value: &entry.value,
        })
    }

    /// Number of compiled patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the switch holds no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Escape special regex characters in a literal string used to build a
/// pattern source.
#[must_use]
pub fn escape(literal: &str) -> String {
    regex::escape(literal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_offsets_are_relative_to_the_owning_pattern() {
        let switch = PatternSwitch::compile(vec![
            (r"^/a/(\d+)/(\w+)$".to_string(), "a"),
            (r"^/b/(\w+)$".to_string(), "b"),
        ])
        .unwrap();

        let m = switch.match_input("/b/hello").unwrap();
        assert_eq!(*m.value, "b");
        assert_eq!(m.captures[0], Some("/b/hello"));
        assert_eq!(m.captures[1], Some("hello"));
    }

    #[test]
    fn no_match_is_none() {
        let switch = PatternSwitch::compile(vec![(r"^/only$".to_string(), ())]).unwrap();
        assert!(switch.match_input("/other").is_none());
    }
}
