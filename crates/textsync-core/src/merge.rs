/// Three-way merge of a flat text field with cursor translation.
///
/// All offsets are counted in chars, not bytes, so a cursor can never land
/// inside a multi-byte code point.
use serde::{Deserialize, Serialize};

/// Separator placed between the two sides of a genuine conflict.
pub const DEFAULT_CONFLICT_SEPARATOR: &str = "\n";

/// Tuning for [`TextMerger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// Inserted between the local and remote middles when both sides
    /// changed the same span differently. Empty means plain concatenation.
    pub conflict_separator: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            conflict_separator: DEFAULT_CONFLICT_SEPARATOR.to_string(),
        }
    }
}

/// Merged text and the translated cursor offset (in chars).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub text: String,
    pub cursor: usize,
}

/// How the differing middle span was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// One side was unchanged, the other side's text was taken whole.
    FastPath,
    /// Both sides made the same change.
    Identical,
    /// Only the remote side changed the span.
    TookRemote,
    /// Only the local side changed the span.
    TookLocal,
    /// Both sides changed the span differently; both were kept, local first.
    Conflict,
}

/// Stateless three-way text merger.
///
/// `merge` is a pure function of its inputs and never fails. On a genuine
/// conflict the result is not commutative: `merge(b, l, r)` keeps `l`
/// before `r`.
#[derive(Debug, Clone, Default)]
pub struct TextMerger {
    options: MergeOptions,
}

fn common_prefix(a: &[char], b: &[char]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[char], b: &[char]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

fn clamped(text: &str, cursor: usize) -> MergeResult {
    MergeResult {
        text: text.to_string(),
        cursor: cursor.min(text.chars().count()),
    }
}

impl TextMerger {
    pub fn new(options: MergeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Merges `local` and `remote`, both derived from `base`.
    ///
    /// `cursor` is a char offset into `local`; the returned cursor is a char
    /// offset into the merged text.
    pub fn merge(&self, base: &str, local: &str, remote: &str, cursor: usize) -> MergeResult {
        self.merge_explained(base, local, remote, cursor).0
    }

    /// Like [`merge`](Self::merge), but also reports how the middle span
    /// was resolved.
    pub fn merge_explained(
        &self,
        base: &str,
        local: &str,
        remote: &str,
        cursor: usize,
    ) -> (MergeResult, Resolution) {
        if base == local {
            return (clamped(remote, cursor), Resolution::FastPath);
        }
        if base == remote {
            return (clamped(local, cursor), Resolution::FastPath);
        }

        let base: Vec<char> = base.chars().collect();
        let local: Vec<char> = local.chars().collect();
        let remote: Vec<char> = remote.chars().collect();

        let shortest = base.len().min(local.len()).min(remote.len());
        let prefix = common_prefix(&base, &local)
            .min(common_prefix(&base, &remote))
            .min(shortest);
        let suffix = common_suffix(&base, &local)
            .min(common_suffix(&base, &remote))
            .min(shortest - prefix);

        let base_mid = &base[prefix..base.len() - suffix];
        let local_mid = &local[prefix..local.len() - suffix];
        let remote_mid = &remote[prefix..remote.len() - suffix];

        let (middle, resolution): (Vec<char>, Resolution) = if local_mid == remote_mid {
            (local_mid.to_vec(), Resolution::Identical)
        } else if base_mid == local_mid {
            (remote_mid.to_vec(), Resolution::TookRemote)
        } else if base_mid == remote_mid {
            (local_mid.to_vec(), Resolution::TookLocal)
        } else {
            let mut joined = local_mid.to_vec();
            joined.extend(self.options.conflict_separator.chars());
            joined.extend_from_slice(remote_mid);
            (joined, Resolution::Conflict)
        };

        let mut text = String::with_capacity(local.len() + middle.len());
        text.extend(&local[..prefix]);
        text.extend(&middle);
        text.extend(&local[local.len() - suffix..]);
        let merged_len = prefix + middle.len() + suffix;

        let cursor = cursor.min(local.len());
        let translated = if cursor <= prefix {
            cursor
        } else if cursor >= local.len() - suffix {
            merged_len - (local.len() - cursor)
        } else {
            let shifted = cursor as i64 + middle.len() as i64 - local_mid.len() as i64;
            shifted.max(0) as usize
        };

        if resolution == Resolution::Conflict {
            tracing::debug!(
                prefix,
                suffix,
                local_mid = local_mid.len(),
                remote_mid = remote_mid.len(),
                "Concurrent edits to the same span, keeping both"
            );
        }

        (
            MergeResult {
                text,
                cursor: translated.min(merged_len),
            },
            resolution,
        )
    }
}

/// Merges with default options. See [`TextMerger::merge`].
pub fn merge(base: &str, local: &str, remote: &str, cursor: usize) -> MergeResult {
    TextMerger::default().merge(base, local, remote, cursor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> TextMerger {
        TextMerger::new(MergeOptions {
            conflict_separator: String::new(),
        })
    }

    #[test]
    fn test_local_unchanged_takes_remote() {
        let r = merge("abc", "abc", "abXc", 3);
        assert_eq!(r.text, "abXc");
        assert_eq!(r.cursor, 3);
    }

    #[test]
    fn test_remote_unchanged_takes_local() {
        let r = merge("abc", "a", "abc", 3);
        assert_eq!(r.text, "a");
        assert_eq!(r.cursor, 1);
    }

    #[test]
    fn test_same_edit_on_both_sides() {
        let (r, how) = TextMerger::default().merge_explained("cat", "cart", "cart", 3);
        assert_eq!(how, Resolution::Identical);
        assert_eq!(r.text, "cart");
        assert_eq!(r.cursor, 3);
    }

    #[test]
    fn test_identical_sides_clamp_cursor() {
        let r = merge("hello", "help", "help", 10);
        assert_eq!(r.text, "help");
        assert_eq!(r.cursor, 4);
    }

    #[test]
    fn test_conflict_keeps_local_then_remote() {
        let (r, how) = TextMerger::default().merge_explained("x", "a", "b", 1);
        assert_eq!(how, Resolution::Conflict);
        assert_eq!(r.text, "a\nb");
        assert_eq!(r.cursor, 3);
    }

    #[test]
    fn test_short_overlapping_edits_do_not_underflow() {
        let r = plain().merge("aa", "a", "aaa", 1);
        assert_eq!(r.text, "aaa");
        assert_eq!(r.cursor, 1);

        let r = plain().merge("aba", "a", "abba", 0);
        assert_eq!(r.text, "abba");
        assert_eq!(r.cursor, 0);
    }

    #[test]
    fn test_empty_strings() {
        assert_eq!(merge("", "", "", 5), MergeResult { text: String::new(), cursor: 0 });
        assert_eq!(merge("", "a", "", 1).text, "a");
        assert_eq!(merge("", "", "b", 0).text, "b");
        assert_eq!(merge("", "a", "b", 1), MergeResult { text: "a\nb".into(), cursor: 3 });
        assert_eq!(merge("abc", "", "", 2), MergeResult { text: String::new(), cursor: 0 });
    }

    #[test]
    fn test_cursor_in_prefix_is_unchanged() {
        let r = merge("abcdef", "abcdefL", "abcdefR", 2);
        assert_eq!(r.text, "abcdefL\nR");
        assert_eq!(r.cursor, 2);
    }

    #[test]
    fn test_cursor_in_suffix_rebases_from_end() {
        let r = plain().merge("hello world", "hello, world", "HELLO world", 10);
        assert_eq!(r.text, "hello,HELLO world");
        // Still right before the "ld" it preceded in the local text.
        assert_eq!(r.cursor, 15);
    }

    #[test]
    fn test_cursor_in_middle_shifts_by_length_delta() {
        let r = merge("one two three", "one 22 three", "one TWO three", 5);
        assert_eq!(r.text, "one 22\nTWO three");
        assert_eq!(r.cursor, 9);
    }

    #[test]
    fn test_multibyte_chars_are_not_split() {
        let r = merge("héllo", "héllo wörld", "¡héllo", 11);
        assert_eq!(r.text, "héllo wörld\n¡héllo");
        assert_eq!(r.cursor, 18);
    }
}
