//! Search ranking for the action list.

use std::cmp::Reverse;

use super::registry::Action;

/// How well an action matched a search term. Lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchRank {
    Exact,
    Prefix,
    Substring,
    Keyword,
}

/// Match `action` against an already lowercased, trimmed term.
///
/// An empty term matches everything equally.
pub fn match_rank(action: &Action, term: &str) -> Option<MatchRank> {
    if term.is_empty() {
        return Some(MatchRank::Exact);
    }

    let title = action.title.to_lowercase();
    if title == term {
        Some(MatchRank::Exact)
    } else if title.starts_with(term) {
        Some(MatchRank::Prefix)
    } else if title.contains(term) {
        Some(MatchRank::Substring)
    } else if action
        .keywords
        .iter()
        .any(|k| k.to_lowercase().contains(term))
    {
        Some(MatchRank::Keyword)
    } else {
        None
    }
}

/// Filter and order actions for `term`: match quality, then priority
/// (highest first), then title.
pub fn rank<'a>(actions: impl IntoIterator<Item = &'a Action>, term: &str) -> Vec<&'a Action> {
    let term = term.trim().to_lowercase();
    let mut matched: Vec<(MatchRank, &Action)> = actions
        .into_iter()
        .filter_map(|a| match_rank(a, &term).map(|r| (r, a)))
        .collect();

    matched.sort_by(|(ra, a), (rb, b)| {
        (ra, Reverse(a.priority), a.title.to_lowercase(), &a.id).cmp(&(
            rb,
            Reverse(b.priority),
            b.title.to_lowercase(),
            &b.id,
        ))
    });
    matched.into_iter().map(|(_, a)| a).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn action(id: &str, title: &str, keywords: &[&str], priority: i32) -> Action {
        Action::new(id, title, |_, _| Ok(()))
            .keywords(keywords)
            .priority(priority)
    }

    fn ids(actions: Vec<&Action>) -> Vec<&str> {
        actions.into_iter().map(|a| a.id.as_str()).collect()
    }

    #[test]
    fn test_rank_order() {
        let actions = vec![
            action("kw", "Clear board", &["note"], 0),
            action("sub", "Sticky note", &[], 0),
            action("prefix", "Note list", &[], 0),
            action("exact", "Note", &[], 0),
            action("none", "Undo", &[], 0),
        ];

        assert_eq!(ids(rank(&actions, "note")), vec!["exact", "prefix", "sub", "kw"]);
    }

    #[test]
    fn test_ties_by_priority_then_title() {
        let actions = vec![
            action("b", "Add Beta", &[], 0),
            action("a", "Add Alpha", &[], 0),
            action("z", "Add Zeta", &[], 10),
        ];

        assert_eq!(ids(rank(&actions, "add")), vec!["z", "a", "b"]);
    }

    #[test]
    fn test_case_insensitive_and_trimmed() {
        let actions = vec![action("undo", "Undo", &[], 0)];
        assert_eq!(ids(rank(&actions, "  UNDO ")), vec!["undo"]);
    }

    #[test]
    fn test_empty_term_lists_everything() {
        let actions = vec![action("b", "B", &[], 0), action("a", "A", &[], 0)];
        assert_eq!(ids(rank(&actions, "")), vec!["a", "b"]);
    }
}
