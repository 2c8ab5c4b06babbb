//! Evaluation of a [`Matcher`] tree against the feedback on a pull
//! request. Evaluation is driven by a processor callback so a single
//! pass can record approvers, disapprovers and gate outcomes.

use std::collections::BTreeSet;

use pullgate_data::Login;

use crate::approval::ApprovalRequest;
use crate::feedback::Feedback;

use super::{Matcher, Quorum};

/// Bookkeeping events emitted while an evaluation walks the feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOp {
    ValidTitle,
    ValidAuthor,
    Approval,
    DisapprovalInsert,
    DisapprovalRemove,
}

pub type Processor<'a> = dyn FnMut(&Feedback, ApprovalOp) + 'a;

/// What a matching feedback does to the participant set.
#[derive(Clone, Copy)]
enum Action {
    /// New approvals join the set and are announced.
    Approve,
    /// Disapprovals join the set, later approvals retract them.
    Anti,
    /// The author gate: accept the synthetic author comment.
    AuthorGate,
    /// Like the gate but silent, used inside `author(...)`.
    AuthorProbe,
}

/// Runs the full approval pipeline: title gate, author gate,
/// disapproval walk, approval walk.
pub fn approve(req: &ApprovalRequest, proc: &mut Processor) -> anyhow::Result<bool> {
    let author_comment = Feedback::synthetic_author_comment(&req.pull_request.author);

    if req.is_title_blocked() {
        return Ok(false);
    }
    proc(&author_comment, ApprovalOp::ValidTitle);

    let author_feedback = [author_comment];
    if !eval(
        &req.policy.author_matcher,
        req,
        proc,
        Action::AuthorGate,
        &author_feedback,
    )? {
        return Ok(false);
    }

    if eval(
        &req.policy.anti_matcher,
        req,
        proc,
        Action::Anti,
        &req.disapproval_feedback,
    )? {
        return Ok(false);
    }

    eval(
        &req.policy.matcher,
        req,
        proc,
        Action::Approve,
        &req.approval_feedback,
    )
}

fn eval(
    matcher: &Matcher,
    req: &ApprovalRequest,
    proc: &mut Processor,
    action: Action,
    feedback: &[Feedback],
) -> anyhow::Result<bool> {
    match matcher {
        Matcher::Universe(quorum) => {
            let candidates = feedback.iter().map(|f| f.author().clone()).collect();
            quorum_match(&candidates, *quorum, req, proc, action, feedback)
        }
        Matcher::Maintainers(quorum) => {
            let candidates = req.snapshot.people.keys().cloned().collect();
            quorum_match(&candidates, *quorum, req, proc, action, feedback)
        }
        Matcher::Entity { name, quorum } => {
            let candidates = req.snapshot.entity_members(name)?;
            quorum_match(&candidates, *quorum, req, proc, action, feedback)
        }
        Matcher::Anonymous { members, quorum } => {
            let mut candidates = BTreeSet::new();
            for member in members {
                candidates.extend(req.snapshot.entity_members(member)?);
            }
            quorum_match(&candidates, *quorum, req, proc, action, feedback)
        }
        Matcher::Us(quorum) => {
            let candidates = req.snapshot.author_org_members(&req.pull_request.author)?;
            quorum_match(&candidates, *quorum, req, proc, action, feedback)
        }
        Matcher::Them(quorum) => {
            let us = req.snapshot.author_org_members(&req.pull_request.author)?;
            let candidates = req
                .snapshot
                .people
                .keys()
                .filter(|login| !us.contains(*login))
                .cloned()
                .collect();
            quorum_match(&candidates, *quorum, req, proc, action, feedback)
        }
        Matcher::IssueAuthor => {
            let author = &req.pull_request.author;
            let candidates: BTreeSet<Login> = req
                .issues
                .iter()
                .filter(|issue| issue.author != *author)
                .map(|issue| issue.author.clone())
                .collect();
            let min = candidates.len();
            do_match(&candidates, false, min, req, proc, action, feedback)
        }
        Matcher::AtLeast { count, choose } => {
            if choose.is_empty() {
                return Ok(false);
            }
            let mut hits = 0u32;
            for child in choose {
                if eval(child, req, proc, action, feedback)? {
                    hits += 1;
                }
            }
            Ok(hits >= *count)
        }
        Matcher::Author(inner) => {
            let author_feedback = [Feedback::synthetic_author_comment(&req.pull_request.author)];
            eval(inner, req, proc, Action::AuthorProbe, &author_feedback)
        }
        // both children always run so every processor call fires
        Matcher::And(children) => {
            if children.is_empty() {
                return Ok(false);
            }
            let mut result = true;
            for child in children {
                result = eval(child, req, proc, action, feedback)? && result;
            }
            Ok(result)
        }
        Matcher::Or(children) => {
            if children.is_empty() {
                return Ok(false);
            }
            let mut result = false;
            for child in children {
                result = eval(child, req, proc, action, feedback)? || result;
            }
            Ok(result)
        }
        Matcher::Not(inner) => Ok(!eval(inner, req, proc, action, feedback)?),
        Matcher::True | Matcher::Disable => Ok(true),
        Matcher::False => Ok(false),
    }
}

fn quorum_match(
    candidates: &BTreeSet<Login>,
    quorum: Quorum,
    req: &ApprovalRequest,
    proc: &mut Processor,
    action: Action,
    feedback: &[Feedback],
) -> anyhow::Result<bool> {
    do_match(
        candidates,
        quorum.self_approval,
        quorum.count as usize,
        req,
        proc,
        action,
        feedback,
    )
}

fn do_match(
    candidates: &BTreeSet<Login>,
    self_approval: bool,
    min: usize,
    req: &ApprovalRequest,
    proc: &mut Processor,
    action: Action,
    feedback: &[Feedback],
) -> anyhow::Result<bool> {
    let mut participants: BTreeSet<Login> = BTreeSet::new();
    for f in feedback {
        let author = f.author();
        // cannot approve your own pull request
        if !self_approval && *author == req.pull_request.author {
            continue;
        }
        if !candidates.contains(author) {
            continue;
        }
        apply(action, req, f, &mut participants, proc);
    }
    Ok(participants.len() >= min)
}

fn apply(
    action: Action,
    req: &ApprovalRequest,
    f: &Feedback,
    participants: &mut BTreeSet<Login>,
    proc: &mut Processor,
) {
    let author = f.author().clone();
    match action {
        Action::Approve => {
            if f.is_approval(req) && !participants.contains(&author) {
                participants.insert(author);
                proc(f, ApprovalOp::Approval);
            }
        }
        Action::Anti => {
            let approval = f.is_approval(req);
            let disapproval = f.is_disapproval(req);
            if approval && disapproval {
                // a body that approves and disapproves cancels out
            } else if disapproval && !participants.contains(&author) {
                participants.insert(author);
                proc(f, ApprovalOp::DisapprovalInsert);
            } else if approval && participants.contains(&author) {
                participants.remove(&author);
                proc(f, ApprovalOp::DisapprovalRemove);
            }
        }
        Action::AuthorGate => {
            participants.insert(author);
            proc(f, ApprovalOp::ValidAuthor);
        }
        Action::AuthorProbe => {
            participants.insert(author);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{approval_request, comment_feedback};

    fn approvals_for(expr: &str) -> (bool, Vec<Login>) {
        let mut req = approval_request();
        req.policy.matcher = expr.parse().unwrap();
        req.approval_feedback = vec![comment_feedback("alice", "I approve")];
        let mut approvals = Vec::new();
        let matched = approve(&req, &mut |f, op| {
            if op == ApprovalOp::Approval {
                approvals.push(f.author().clone());
            }
        })
        .unwrap();
        (matched, approvals)
    }

    #[test]
    fn or_keeps_collecting_after_a_true_branch() {
        let (matched, approvals) = approvals_for("true or all");
        assert!(matched);
        assert_eq!(approvals, vec![Login::new("alice")]);
    }

    #[test]
    fn and_walks_both_sides_even_when_the_left_fails() {
        let (matched, approvals) = approvals_for("false and all");
        assert!(!matched);
        assert_eq!(approvals, vec![Login::new("alice")]);
    }
}
