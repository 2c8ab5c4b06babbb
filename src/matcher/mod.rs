//! The approval expression language. An expression like
//! `all[count=2,self=false] or {alice,bob}` parses into a [`Matcher`]
//! tree that decides whether the feedback on a pull request amounts to
//! an approval.

mod parse;
mod scan;

pub mod eval;

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use pullgate_data::Login;

use crate::error::{bad_request, MultiError};
use crate::snapshot::MaintainerSnapshot;

/// Approval threshold shared by the membership matchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quorum {
    /// Minimum number of approvals required.
    pub count: u32,
    /// Whether the author may approve their own pull request.
    pub self_approval: bool,
}

impl Default for Quorum {
    fn default() -> Self {
        Quorum {
            count: 1,
            self_approval: true,
        }
    }
}

impl fmt::Display for Quorum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[count={},self={}]", self.count, self.self_approval)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// `all`: any maintainer listed in the snapshot.
    Maintainers(Quorum),
    /// `universe`: anyone who left feedback.
    Universe(Quorum),
    /// `us`: members of groups the author belongs to.
    Us(Quorum),
    /// `them`: maintainers outside the author's groups.
    Them(Quorum),
    /// A named person or group from the snapshot.
    Entity { name: Login, quorum: Quorum },
    /// `{a,b}`: an inline group. Members are kept sorted.
    Anonymous { members: Vec<Login>, quorum: Quorum },
    AtLeast { count: u32, choose: Vec<Matcher> },
    /// Evaluates the inner matcher against the author alone.
    Author(Box<Matcher>),
    /// Approvers must cover the authors of every referenced issue.
    IssueAuthor,
    And(Vec<Matcher>),
    Or(Vec<Matcher>),
    Not(Box<Matcher>),
    True,
    False,
    /// `off`: approval always succeeds and the policy is marked disabled.
    Disable,
}

impl Matcher {
    pub fn parse(input: &str) -> anyhow::Result<Matcher> {
        parse::parse(input)
    }

    /// The default approval matcher, one maintainer approval.
    pub fn default_match() -> Matcher {
        Matcher::Maintainers(Quorum::default())
    }

    /// The default author gate, satisfied by any author.
    pub fn default_author_match() -> Matcher {
        Matcher::Universe(Quorum::default())
    }

    /// Checks thresholds and entity references against a snapshot.
    /// All problems are reported, not just the first.
    pub fn validate(&self, snapshot: &MaintainerSnapshot) -> anyhow::Result<()> {
        let mut errs = MultiError::new();
        self.validate_into(snapshot, &mut errs);
        errs.into_result()
    }

    fn validate_into(&self, snapshot: &MaintainerSnapshot, errs: &mut MultiError) {
        match self {
            Matcher::Maintainers(q)
            | Matcher::Universe(q)
            | Matcher::Us(q)
            | Matcher::Them(q) => validate_quorum(q, errs),
            Matcher::Entity { name, quorum } => {
                validate_quorum(quorum, errs);
                validate_entity(name, snapshot, errs);
            }
            Matcher::Anonymous { members, quorum } => {
                validate_quorum(quorum, errs);
                for member in members {
                    validate_entity(member, snapshot, errs);
                }
            }
            Matcher::AtLeast { count, choose } => {
                if *count == 0 {
                    errs.push(bad_request("approval count must be positive"));
                }
                for child in choose {
                    child.validate_into(snapshot, errs);
                }
            }
            Matcher::Author(inner) | Matcher::Not(inner) => {
                inner.validate_into(snapshot, errs);
            }
            Matcher::And(children) | Matcher::Or(children) => {
                for child in children {
                    child.validate_into(snapshot, errs);
                }
            }
            Matcher::IssueAuthor | Matcher::True | Matcher::False | Matcher::Disable => {}
        }
    }
}

fn validate_quorum(quorum: &Quorum, errs: &mut MultiError) {
    if quorum.count == 0 {
        errs.push(bad_request("approval count must be positive"));
    }
}

fn validate_entity(name: &Login, snapshot: &MaintainerSnapshot, errs: &mut MultiError) {
    if !snapshot.org.contains_key(name) && !snapshot.people.contains_key(name) {
        errs.push(bad_request(format!("{name} must be either org or person")));
    }
}

// The Display output is the canonical spelling: attributes are always
// written out, anonymous members are sorted and boolean operators are
// joined without parentheses.
impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Matcher::Maintainers(q) => write!(f, "all{q}"),
            Matcher::Universe(q) => write!(f, "universe{q}"),
            Matcher::Us(q) => write!(f, "us{q}"),
            Matcher::Them(q) => write!(f, "them{q}"),
            Matcher::Entity { name, quorum } => write!(f, "{name}{quorum}"),
            Matcher::Anonymous { members, quorum } => {
                let names: Vec<&str> = members.iter().map(Login::as_str).collect();
                write!(f, "{{{}}}{quorum}", names.join(","))
            }
            Matcher::AtLeast { count, choose } => {
                write!(f, "atleast({count}")?;
                for child in choose {
                    write!(f, ",{child}")?;
                }
                write!(f, ")")
            }
            Matcher::Author(inner) => write!(f, "author({inner})"),
            Matcher::IssueAuthor => f.write_str("issue-author"),
            Matcher::And(children) => write_joined(f, children, " and "),
            Matcher::Or(children) => write_joined(f, children, " or "),
            Matcher::Not(inner) => write!(f, "not {inner}"),
            Matcher::True => f.write_str("true"),
            Matcher::False => f.write_str("false"),
            Matcher::Disable => f.write_str("off"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter, children: &[Matcher], sep: &str) -> fmt::Result {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{child}")?;
    }
    Ok(())
}

impl FromStr for Matcher {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Matcher> {
        Matcher::parse(s)
    }
}

impl Serialize for Matcher {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Matcher {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Matcher::parse(&text).map_err(D::Error::custom)
    }
}
