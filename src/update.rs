//! Change-log normalization.
//!
//! Converts one raw `(timestamp, author, field, old, new)` entry from the
//! tracker into a typed [`Update`]. Normalization never fails: malformed
//! comment numbering degrades to the single-id form.

use crate::encoding::maybe_reencode;
use crate::models::{Change, RawChange, Update};
use crate::terms::parse_terms_or_empty;

/// Normalize one raw change-log entry for `ticket_id`.
///
/// `base_url` is the tracker root used to derive attachment and comment
/// links. When `encode_fallback` is set, free-text values are passed through
/// [`crate::encoding::reencode`].
pub fn normalize_update(
    base_url: &str,
    ticket_id: u64,
    raw: &RawChange,
    encode_fallback: bool,
) -> Update {
    let change = match raw.field.as_str() {
        "attachment" => {
            let filename = maybe_reencode(&raw.new, encode_fallback);
            Change::Attachment {
                link: format!("{}/attachment/ticket/{}/{}", base_url, ticket_id, filename),
            }
        }
        "comment" => {
            let (comment_id, replying_to) = parse_comment_numbering(&raw.old);
            let link = comment_id
                .as_ref()
                .map(|cid| format!("{}/ticket/{}#comment:{}", base_url, ticket_id, cid));
            Change::Comment {
                comment: maybe_reencode(&raw.new, encode_fallback),
                comment_id,
                replying_to,
                link,
            }
        }
        "keywords" => Change::Keywords {
            previous_terms: parse_terms_or_empty(&raw.old),
            new_terms: parse_terms_or_empty(&raw.new),
        },
        "focuses" => Change::Focuses {
            previous_terms: parse_terms_or_empty(&raw.old),
            new_terms: parse_terms_or_empty(&raw.new),
        },
        name => Change::Field {
            name: name.to_string(),
            previous: maybe_reencode(&raw.old, encode_fallback),
            new: maybe_reencode(&raw.new, encode_fallback),
        },
    };

    Update {
        time: raw.time * 1000,
        user: raw.author.clone(),
        change,
    }
}

/// Parse Trac comment numbering (`"3"` or `"2.3"`) into
/// `(comment_id, replying_to)`.
///
/// With two or more dot-separated parts the second is the comment id and the
/// first the comment being replied to (0 when not numeric). A single
/// non-empty part is the comment id alone. Empty ids resolve to `None`.
fn parse_comment_numbering(numbering: &str) -> (Option<String>, Option<i64>) {
    let parts: Vec<&str> = numbering.split('.').collect();
    if parts.len() > 1 {
        let replying_to = parts[0].trim().parse::<i64>().unwrap_or(0);
        let comment_id = Some(parts[1].to_string()).filter(|id| !id.is_empty());
        (comment_id, Some(replying_to))
    } else if !parts[0].is_empty() {
        (Some(parts[0].to_string()), None)
    } else {
        (None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://core.trac.wordpress.org";

    fn raw(field: &str, old: &str, new: &str) -> RawChange {
        RawChange {
            time: 1_500_000_000,
            author: "jdoe".to_string(),
            field: field.to_string(),
            old: old.to_string(),
            new: new.to_string(),
        }
    }

    #[test]
    fn attachment_link() {
        let update = normalize_update(BASE, 42, &raw("attachment", "", "42.diff"), false);
        assert_eq!(update.time, 1_500_000_000_000);
        assert_eq!(update.user, "jdoe");
        assert_eq!(
            update.change,
            Change::Attachment {
                link: "https://core.trac.wordpress.org/attachment/ticket/42/42.diff".to_string()
            }
        );
    }

    #[test]
    fn attachment_filename_reencoded_in_fallback() {
        let update = normalize_update(BASE, 42, &raw("attachment", "", "a\u{0}.diff"), true);
        assert_eq!(update.update_type(), "attachment");
        match update.change {
            Change::Attachment { link } => assert!(link.ends_with("/42/a.diff")),
            other => panic!("unexpected change: {:?}", other),
        }
    }

    #[test]
    fn reply_comment() {
        let update = normalize_update(BASE, 7, &raw("comment", "5.3", "Agreed."), false);
        assert_eq!(
            update.change,
            Change::Comment {
                comment: "Agreed.".to_string(),
                comment_id: Some("3".to_string()),
                replying_to: Some(5),
                link: Some("https://core.trac.wordpress.org/ticket/7#comment:3".to_string()),
            }
        );
    }

    #[test]
    fn non_numeric_reply_target_is_zero() {
        let update = normalize_update(BASE, 7, &raw("comment", "description.4", "x"), false);
        match update.change {
            Change::Comment {
                comment_id,
                replying_to,
                ..
            } => {
                assert_eq!(comment_id.as_deref(), Some("4"));
                assert_eq!(replying_to, Some(0));
            }
            other => panic!("unexpected change: {:?}", other),
        }
    }

    #[test]
    fn single_comment_id() {
        let update = normalize_update(BASE, 7, &raw("comment", "3", "First!"), false);
        match update.change {
            Change::Comment {
                comment_id,
                replying_to,
                link,
                ..
            } => {
                assert_eq!(comment_id.as_deref(), Some("3"));
                assert_eq!(replying_to, None);
                assert!(link.is_some());
            }
            other => panic!("unexpected change: {:?}", other),
        }
    }

    #[test]
    fn empty_numbering_sets_nothing() {
        let update = normalize_update(BASE, 7, &raw("comment", "", "text"), false);
        assert_eq!(
            update.change,
            Change::Comment {
                comment: "text".to_string(),
                comment_id: None,
                replying_to: None,
                link: None,
            }
        );
    }

    #[test]
    fn trailing_dot_has_no_comment_id() {
        let (id, reply) = parse_comment_numbering("5.");
        assert_eq!(id, None);
        assert_eq!(reply, Some(5));
    }

    #[test]
    fn keyword_terms() {
        let update = normalize_update(BASE, 7, &raw("keywords", "", "has-patch, commit"), false);
        assert_eq!(
            update.change,
            Change::Keywords {
                previous_terms: vec![],
                new_terms: vec!["has-patch".to_string(), "commit".to_string()],
            }
        );
    }

    #[test]
    fn focus_terms() {
        let update = normalize_update(BASE, 7, &raw("focuses", "ui javascript", ""), false);
        assert_eq!(
            update.change,
            Change::Focuses {
                previous_terms: vec!["ui".to_string(), "javascript".to_string()],
                new_terms: vec![],
            }
        );
    }

    #[test]
    fn generic_field_change() {
        let update = normalize_update(BASE, 7, &raw("status", "new", "closed"), false);
        assert_eq!(update.update_type(), "status");
        assert_eq!(
            update.change,
            Change::Field {
                name: "status".to_string(),
                previous: "new".to_string(),
                new: "closed".to_string(),
            }
        );
    }
}
