use crate::error::{KilroyError, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Ordered list of hybridization cycles to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HybeList(Vec<u32>);

impl HybeList {
    /// Exactly the given cycles, in the given order, repeats included.
    pub fn new(hybes: Vec<u32>) -> Result<Self> {
        if hybes.is_empty() {
            return Err(KilroyError::EmptyHybeList);
        }
        Ok(Self(hybes))
    }

    /// Parse operator input such as `"4 5 6 10"`, `"1-8 12"` or `"12"`.
    ///
    /// A single bare number `N` means cycles `1..=N`. Anything else is the
    /// union of the listed numbers and inclusive ranges, sorted and
    /// deduplicated. Cycles named in `ignore` (same syntax, but a bare
    /// number is just that number) are removed.
    pub fn parse(input: &str, ignore: &str) -> Result<Self> {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        let selected: BTreeSet<u32> = match tokens.as_slice() {
            [] => return Err(KilroyError::EmptyHybeList),
            [single] if !single.contains('-') => {
                let count = parse_number(single)?;
                (1..=count).collect()
            }
            _ => expand(&tokens)?,
        };

        let ignore_tokens: Vec<&str> = ignore.split_whitespace().collect();
        let ignored = expand(&ignore_tokens)?;

        let hybes: Vec<u32> = selected.difference(&ignored).copied().collect();
        Self::new(hybes)
    }

    /// Parse a run sequence such as `"3 1 3"` or `"1-3 2"`, keeping the
    /// written order and repeats. Ranges expand in place and a single bare
    /// number is just that cycle. Cycles named in `ignore` are dropped
    /// wherever they appear.
    pub fn parse_sequence(input: &str, ignore: &str) -> Result<Self> {
        let mut hybes = Vec::new();
        for token in input.split_whitespace() {
            match token.split_once('-') {
                Some(_) => hybes.extend(parse_range(token)?),
                None => hybes.push(parse_number(token)?),
            }
        }

        let ignore_tokens: Vec<&str> = ignore.split_whitespace().collect();
        let ignored = expand(&ignore_tokens)?;
        hybes.retain(|h| !ignored.contains(h));
        Self::new(hybes)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for HybeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&parts.join(" "))
    }
}

fn parse_number(token: &str) -> Result<u32> {
    token
        .parse::<u32>()
        .map_err(|_| KilroyError::InvalidHybeList(token.to_string()))
}

fn expand(tokens: &[&str]) -> Result<BTreeSet<u32>> {
    let mut out = BTreeSet::new();
    for token in tokens {
        match token.split_once('-') {
            Some(_) => out.extend(parse_range(token)?),
            None => {
                out.insert(parse_number(token)?);
            }
        }
    }
    Ok(out)
}

fn parse_range(token: &str) -> Result<std::ops::RangeInclusive<u32>> {
    let (start, end) = token.split_once('-').ok_or_else(|| invalid(token))?;
    let start = parse_number(start).map_err(|_| invalid(token))?;
    let end = parse_number(end).map_err(|_| invalid(token))?;
    if start > end {
        return Err(invalid(token));
    }
    Ok(start..=end)
}

fn invalid(token: &str) -> KilroyError {
    KilroyError::InvalidHybeList(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_number_means_first_n() {
        let list = HybeList::parse("4", "").unwrap();
        assert_eq!(list.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn list_is_sorted_and_deduplicated() {
        let list = HybeList::parse("10 4 5 4 6", "").unwrap();
        assert_eq!(list.as_slice(), &[4, 5, 6, 10]);
    }

    #[test]
    fn ranges_expand_inclusively() {
        let list = HybeList::parse("1-3 8", "").unwrap();
        assert_eq!(list.as_slice(), &[1, 2, 3, 8]);
        let single_range = HybeList::parse("5-7", "").unwrap();
        assert_eq!(single_range.as_slice(), &[5, 6, 7]);
    }

    #[test]
    fn ignore_list_removes_cycles() {
        let list = HybeList::parse("1-6", "2 4-5").unwrap();
        assert_eq!(list.as_slice(), &[1, 3, 6]);
        let list = HybeList::parse("3", "1").unwrap();
        assert_eq!(list.as_slice(), &[2, 3]);
    }

    #[test]
    fn rejects_garbage_and_reversed_ranges() {
        assert!(matches!(
            HybeList::parse("1 two", ""),
            Err(KilroyError::InvalidHybeList(ref t)) if t == "two"
        ));
        assert!(matches!(
            HybeList::parse("7-3", ""),
            Err(KilroyError::InvalidHybeList(ref t)) if t == "7-3"
        ));
        assert!(HybeList::parse("1 2", "x").is_err());
    }

    #[test]
    fn empty_results_are_errors() {
        assert!(matches!(HybeList::parse("  ", ""), Err(KilroyError::EmptyHybeList)));
        assert!(matches!(HybeList::parse("0", ""), Err(KilroyError::EmptyHybeList)));
        assert!(matches!(HybeList::parse("1 2", "1-2"), Err(KilroyError::EmptyHybeList)));
    }

    #[test]
    fn sequence_keeps_written_order_and_repeats() {
        let list = HybeList::parse_sequence("3 1 3", "").unwrap();
        assert_eq!(list.as_slice(), &[3, 1, 3]);
        let list = HybeList::parse_sequence("5-6 2 5", "").unwrap();
        assert_eq!(list.as_slice(), &[5, 6, 2, 5]);
    }

    #[test]
    fn sequence_single_number_is_one_cycle() {
        let list = HybeList::parse_sequence("4", "").unwrap();
        assert_eq!(list.as_slice(), &[4]);
    }

    #[test]
    fn sequence_ignore_drops_every_occurrence() {
        let list = HybeList::parse_sequence("3 1 3 2", "3").unwrap();
        assert_eq!(list.as_slice(), &[1, 2]);
        assert!(matches!(
            HybeList::parse_sequence("2 2", "2"),
            Err(KilroyError::EmptyHybeList)
        ));
        assert!(matches!(
            HybeList::parse_sequence("4-2", ""),
            Err(KilroyError::InvalidHybeList(ref t)) if t == "4-2"
        ));
    }

    #[test]
    fn explicit_lists_keep_order_and_repeats() {
        let list = HybeList::new(vec![3, 1, 3]).unwrap();
        assert_eq!(list.as_slice(), &[3, 1, 3]);
        assert_eq!(list.to_string(), "3 1 3");
    }
}
