//! The line-oriented MAINTAINERS dialect. One entry per line: a bare
//! login, `Name <email>`, `Name <email> (@login)`, or a `github-org`,
//! `github-collab` or `github-team` directive.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use anyhow::Context as _;
use pullgate_data::{Login, Person, Repo};
use regex::Regex;

use crate::ctx::Ctx;
use crate::error::bad_request;
use crate::forge::Forge;

use super::{Maintainer, OrgInput, SELF_REPO};

fn re_org() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^github-org (\S+)").unwrap())
}

fn re_collab() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^github-collab (\S+)").unwrap())
}

fn re_team() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^github-team (\S+)\s*(\S*)").unwrap())
}

fn re_login_meta() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(.+) <(.+)> \(@(.+)\)").unwrap())
}

fn re_login_email() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(.+) <(.+)>").unwrap())
}

pub(super) fn org_directive(line: &str) -> Option<&str> {
    re_org().captures(line).map(|c| c.get(1).unwrap().as_str())
}

pub(super) fn collab_directive(line: &str) -> Option<&str> {
    re_collab().captures(line).map(|c| c.get(1).unwrap().as_str())
}

pub(super) fn team_directive(line: &str) -> Option<(&str, &str)> {
    re_team()
        .captures(line)
        .map(|c| (c.get(1).unwrap().as_str(), c.get(2).unwrap().as_str()))
}

pub(super) fn parse(
    forge: &dyn Forge,
    ctx: &Ctx,
    data: &str,
    repo: &Repo,
) -> anyhow::Result<Maintainer> {
    let mut m = Maintainer::default();
    for raw_line in data.lines() {
        let line = strip_comment(raw_line);
        if line.is_empty() {
            continue;
        }
        if let Some(org) = org_directive(line) {
            let name = if org == SELF_REPO { &repo.owner } else { org };
            add_org(&mut m, line, name)?;
        } else if let Some(collab) = collab_directive(line) {
            let slug = if collab == SELF_REPO {
                repo.slug.clone()
            } else {
                collab.to_string()
            };
            add_org(&mut m, line, &format!("{slug}-collaborators"))?;
        } else if let Some((team, team_org)) = team_directive(line) {
            if team == SELF_REPO {
                expand_all_teams(forge, ctx, repo, team_org, &mut m)?;
            } else {
                let name = if team_org.is_empty() {
                    team.to_string()
                } else {
                    format!("{team_org}-{team}")
                };
                add_org(&mut m, line, &name)?;
            }
        } else {
            let person = parse_person(line)
                .ok_or_else(|| bad_request(format!("unable to parse line: {line}")))?;
            m.raw_people.insert(Login::from(person.login.as_str()), person);
        }
    }
    Ok(m)
}

/// `github-team repo-self` enumerates every team of the enclosing
/// organization, plus a sentinel group holding the whole org.
fn expand_all_teams(
    forge: &dyn Forge,
    ctx: &Ctx,
    repo: &Repo,
    team_org: &str,
    m: &mut Maintainer,
) -> anyhow::Result<()> {
    let (org, sentinel_member) = if team_org.is_empty() {
        if !repo.org {
            return Err(bad_request(format!(
                "cannot expand teams for user repository {}",
                repo.slug
            )));
        }
        (repo.owner.clone(), "github-org repo-self".to_string())
    } else {
        (team_org.to_string(), format!("github-org {team_org}"))
    };
    add_org(m, &sentinel_member, &format!("_{team_org}"))?;
    let teams = forge
        .list_teams(ctx, &org)
        .with_context(|| format!("listing teams of {org}"))?;
    for team in teams {
        let (member, name) = if team_org.is_empty() {
            (format!("github-team {team}"), team.clone())
        } else {
            (format!("github-team {team} {org}"), format!("{org}-{team}"))
        };
        add_org(m, &member, &name)?;
    }
    Ok(())
}

fn add_org(m: &mut Maintainer, member: &str, name: &str) -> anyhow::Result<()> {
    let key = Login::from(name);
    if m.raw_org.contains_key(&key) {
        return Err(bad_request(format!("duplicate organization detected {key}")));
    }
    m.raw_org.insert(
        key,
        OrgInput {
            people: BTreeSet::from([member.to_string()]),
        },
    );
    Ok(())
}

fn strip_comment(line: &str) -> &str {
    if line.is_empty() || line.starts_with('#') {
        return "";
    }
    match line.find(" #") {
        Some(index) => line[..index].trim(),
        None => line.trim(),
    }
}

fn parse_person(line: &str) -> Option<Person> {
    if let Some(captures) = re_login_meta().captures(line) {
        return Some(Person {
            name: captures[1].trim().to_string(),
            email: captures[2].trim().to_string(),
            login: captures[3].trim().to_string(),
        });
    }
    if let Some(captures) = re_login_email().captures(line) {
        return Some(Person {
            name: String::new(),
            email: captures[2].trim().to_string(),
            login: captures[1].trim().to_string(),
        });
    }
    let line = line.trim();
    if !line.is_empty() && !line.contains(char::is_whitespace) {
        return Some(Person {
            login: line.to_string(),
            ..Person::default()
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_ctx, test_repo, FakeForge};

    fn parse_text(data: &str) -> anyhow::Result<Maintainer> {
        let forge = FakeForge::default();
        parse(&forge, &test_ctx(), data, &test_repo())
    }

    #[test]
    fn person_forms_are_recognized() {
        let m = parse_text(
            "octocat\n\
             Jane Doe <jane@example.com> (@jane)\n\
             bob <bob@example.com>\n",
        )
        .unwrap();
        assert_eq!(m.raw_people.len(), 3);
        let jane = &m.raw_people[&Login::from("jane")];
        assert_eq!(jane.name, "Jane Doe");
        assert_eq!(jane.email, "jane@example.com");
        let bob = &m.raw_people[&Login::from("bob")];
        assert_eq!(bob.email, "bob@example.com");
    }

    #[test]
    fn comments_are_stripped() {
        let m = parse_text(
            "# leading comment\n\
             octocat # trailing comment\n",
        )
        .unwrap();
        assert_eq!(m.raw_people.len(), 1);
        assert!(m.raw_people.contains_key(&Login::from("octocat")));
    }

    #[test]
    fn directives_become_single_member_groups() {
        let m = parse_text(
            "github-org acme\n\
             github-collab repo-self\n\
             github-team ops acme\n",
        )
        .unwrap();
        assert!(m.raw_org[&Login::from("acme")]
            .people
            .contains("github-org acme"));
        assert!(m
            .raw_org
            .contains_key(&Login::from("octo/widgets-collaborators")));
        assert!(m.raw_org.contains_key(&Login::from("acme-ops")));
    }

    #[test]
    fn duplicate_groups_are_rejected() {
        let err = parse_text("github-org acme\ngithub-org acme\n").unwrap_err();
        assert!(err.to_string().contains("duplicate organization"));
    }

    #[test]
    fn unparseable_lines_are_errors() {
        assert!(parse_text("not a valid line at all <\n").is_err());
    }

    #[test]
    fn repo_self_team_expands_every_team() {
        let forge = FakeForge::default().with_teams("octo", &["ops", "release"]);
        let m = parse(&forge, &test_ctx(), "github-team repo-self\n", &test_repo()).unwrap();
        assert!(m.raw_org[&Login::from("_")]
            .people
            .contains("github-org repo-self"));
        assert!(m.raw_org[&Login::from("ops")]
            .people
            .contains("github-team ops"));
        assert!(m.raw_org.contains_key(&Login::from("release")));
    }
}
