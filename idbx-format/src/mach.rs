//! Machine (board) bindings and the `mach` filter.
//!
//! A package lists the boards a directive applies to. The active bindings
//! come from the command line, one value per board.

use std::collections::BTreeMap;
use std::fmt;

/// Board assumed when a binding or constraint has no `BOARD=` part.
pub const DEFAULT_BOARD: &str = "CPUBOARD";

/// Marks a constraint board as negated: `CPUBOARD!=IP22`.
pub const NEGATION_MARKER: char = '!';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MachError {
    #[error("mach `{0}` already set")]
    Duplicate(String),

    #[error("empty board name in mach binding `{0}`")]
    EmptyBoard(String),
}

fn split_binding(binding: &str) -> (&str, &str) {
    match binding.split_once('=') {
        Some((board, value)) => (board, value),
        None => (DEFAULT_BOARD, binding),
    }
}

/// One value of a `mach` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachConstraint {
    pub board: String,
    pub value: String,
    pub negated: bool,
}

impl MachConstraint {
    pub fn parse(raw: &str) -> MachConstraint {
        let (board, value) = split_binding(raw);
        let (board, negated) = match board.strip_suffix(NEGATION_MARKER) {
            Some(board) => (board, true),
            None => (board, false),
        };

        MachConstraint {
            board: board.to_string(),
            value: value.to_string(),
            negated,
        }
    }
}

/// Outcome of evaluating a directive's constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Apply,
    Skip(SkipReason),
}

impl Filter {
    pub fn applies(&self) -> bool {
        matches!(self, Filter::Apply)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A negated constraint matched the active value.
    Excluded {
        board: String,
        active: String,
        values: Vec<String>,
    },
    /// The active value is not among the allowed ones.
    NotSelected {
        board: String,
        active: String,
        values: Vec<String>,
    },
    /// The directive names a board that has no active binding.
    UnknownBoard { board: String, values: Vec<String> },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Excluded {
                board,
                active,
                values,
            } => write!(f, "mach `{board}={active}` in `{values:?}`"),
            SkipReason::NotSelected {
                board,
                active,
                values,
            } => write!(f, "mach `{board}={active}` not in `{values:?}`"),
            SkipReason::UnknownBoard { board, values } => {
                write!(f, "unknown mach `{board}` `{values:?}`")
            }
        }
    }
}

/// The active board bindings. Each board is bound at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineSet {
    boards: BTreeMap<String, String>,
}

impl MachineSet {
    pub fn new() -> MachineSet {
        MachineSet::default()
    }

    /// Builds the set from `BOARD=VALUE` or bare `VALUE` bindings.
    pub fn from_bindings<I, S>(bindings: I) -> Result<MachineSet, MachError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = MachineSet::new();
        for binding in bindings {
            let binding = binding.as_ref();
            let (board, value) = split_binding(binding);
            if board.is_empty() {
                return Err(MachError::EmptyBoard(binding.to_string()));
            }
            set.insert(board, value)?;
        }
        Ok(set)
    }

    pub fn insert(
        &mut self,
        board: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), MachError> {
        use std::collections::btree_map::Entry;

        match self.boards.entry(board.into()) {
            Entry::Occupied(entry) => Err(MachError::Duplicate(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(value.into());
                Ok(())
            }
        }
    }

    pub fn get(&self, board: &str) -> Option<&str> {
        self.boards.get(board).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.boards.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Decides whether a directive with the given constraints applies.
    ///
    /// Negated constraints are checked first and win over everything else.
    /// A positive constraint on a board without a binding skips the
    /// directive.
    pub fn evaluate(&self, constraints: &[MachConstraint]) -> Filter {
        for (board, values) in group(constraints, true) {
            if let Some(active) = self.get(board) {
                if values.iter().any(|v| *v == active) {
                    return Filter::Skip(SkipReason::Excluded {
                        board: board.to_string(),
                        active: active.to_string(),
                        values: owned(&values),
                    });
                }
            }
        }

        for (board, values) in group(constraints, false) {
            let Some(active) = self.get(board) else {
                return Filter::Skip(SkipReason::UnknownBoard {
                    board: board.to_string(),
                    values: owned(&values),
                });
            };
            if !values.iter().any(|v| *v == active) {
                return Filter::Skip(SkipReason::NotSelected {
                    board: board.to_string(),
                    active: active.to_string(),
                    values: owned(&values),
                });
            }
        }

        Filter::Apply
    }
}

/// Groups constraint values by board, keeping the order boards first appear in.
fn group(constraints: &[MachConstraint], negated: bool) -> Vec<(&str, Vec<&str>)> {
    let mut groups: Vec<(&str, Vec<&str>)> = vec![];
    for c in constraints.iter().filter(|c| c.negated == negated) {
        match groups.iter_mut().find(|(board, _)| *board == c.board) {
            Some((_, values)) => values.push(c.value.as_str()),
            None => groups.push((c.board.as_str(), vec![c.value.as_str()])),
        }
    }
    groups
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints(raw: &[&str]) -> Vec<MachConstraint> {
        raw.iter().map(|r| MachConstraint::parse(r)).collect()
    }

    #[test]
    fn parse_constraint() {
        assert_eq!(
            MachConstraint::parse("IP22"),
            MachConstraint {
                board: "CPUBOARD".into(),
                value: "IP22".into(),
                negated: false
            }
        );
        assert_eq!(
            MachConstraint::parse("GFXBOARD!=NEWPORT"),
            MachConstraint {
                board: "GFXBOARD".into(),
                value: "NEWPORT".into(),
                negated: true
            }
        );
        // Only the first `=` separates board and value.
        assert_eq!(MachConstraint::parse("MODE=a=b").value, "a=b");
    }

    #[test]
    fn duplicate_binding() {
        let err = MachineSet::from_bindings(["IP22", "CPUBOARD=IP24"]).unwrap_err();
        assert_eq!(err, MachError::Duplicate("CPUBOARD".into()));
    }

    #[test]
    fn empty_board() {
        let err = MachineSet::from_bindings(["=IP22"]).unwrap_err();
        assert!(matches!(err, MachError::EmptyBoard(_)));
    }

    #[test]
    fn no_constraints_apply() {
        assert_eq!(MachineSet::new().evaluate(&[]), Filter::Apply);
    }

    #[test]
    fn positive_match() {
        let set = MachineSet::from_bindings(["IP22", "GFXBOARD=NEWPORT"]).unwrap();
        let filter = set.evaluate(&constraints(&["CPUBOARD=IP20", "IP22", "GFXBOARD=NEWPORT"]));
        assert_eq!(filter, Filter::Apply);
    }

    #[test]
    fn positive_mismatch() {
        let set = MachineSet::from_bindings(["IP22"]).unwrap();
        let filter = set.evaluate(&constraints(&["IP19", "IP20"]));
        assert_eq!(
            filter,
            Filter::Skip(SkipReason::NotSelected {
                board: "CPUBOARD".into(),
                active: "IP22".into(),
                values: vec!["IP19".into(), "IP20".into()],
            })
        );
    }

    #[test]
    fn unknown_board() {
        let set = MachineSet::from_bindings(["IP22"]).unwrap();
        let filter = set.evaluate(&constraints(&["SUBGR=IP22-5.3"]));
        assert!(matches!(
            filter,
            Filter::Skip(SkipReason::UnknownBoard { ref board, .. }) if board == "SUBGR"
        ));
    }

    #[test]
    fn negated_match_short_circuits() {
        // The positive constraint names an unbound board, but the negation
        // wins before it is looked at.
        let set = MachineSet::from_bindings(["IP22"]).unwrap();
        let filter = set.evaluate(&constraints(&["SUBGR=X", "CPUBOARD!=IP22"]));
        assert!(matches!(filter, Filter::Skip(SkipReason::Excluded { .. })));
    }

    #[test]
    fn negated_unbound_board_applies() {
        let set = MachineSet::new();
        assert_eq!(set.evaluate(&constraints(&["GFXBOARD!=LIGHT"])), Filter::Apply);
    }

    #[test]
    fn negated_other_value_applies() {
        let set = MachineSet::from_bindings(["IP22"]).unwrap();
        assert_eq!(set.evaluate(&constraints(&["CPUBOARD!=IP19"])), Filter::Apply);
    }

    #[test]
    fn skip_reason_display() {
        let reason = SkipReason::UnknownBoard {
            board: "SUBGR".into(),
            values: vec!["A".into()],
        };
        assert_eq!(reason.to_string(), "unknown mach `SUBGR` `[\"A\"]`");
    }
}
