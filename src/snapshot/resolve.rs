//! Builds a [`MaintainerSnapshot`] for a repository: finds the
//! configuration and MAINTAINERS files, parses them and expands group
//! directives through the forge.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context as _;
use pullgate_data::{Login, Person, Repo};

use crate::config::{parse_config, parse_legacy_config, Config};
use crate::ctx::Ctx;
use crate::error::{bad_request, severity, MultiError, Severity};
use crate::forge::{Capabilities, Forge};

use super::text::{collab_directive, org_directive, team_directive};
use super::{parse_maintainer, Maintainer, MaintainerSnapshot, Org, SELF_REPO};

pub const CONFIG_FILE: &str = ".pullgate";
pub const LEGACY_CONFIG_FILE: &str = ".lgtm";
/// Repository holding org-wide fallbacks for both files.
pub const ORG_REPO_NAME: &str = "pullgate-configuration";
pub const CONFIG_TEMPLATE: &str = "template.pullgate";
pub const MAINTAINERS_TEMPLATE: &str = "template.MAINTAINERS";

pub fn get_config_and_maintainers(
    forge: &Arc<dyn Forge>,
    ctx: &Ctx,
    caps: &Capabilities,
    repo: &Repo,
) -> anyhow::Result<(Config, MaintainerSnapshot)> {
    let config = get_config(forge.as_ref(), ctx, caps, repo)?;
    let snapshot = create_snapshot(forge, ctx, caps, repo, &config)?;
    Ok((config, snapshot))
}

pub fn get_config(
    forge: &dyn Forge,
    ctx: &Ctx,
    caps: &Capabilities,
    repo: &Repo,
) -> anyhow::Result<Config> {
    let mut config = find_config(forge, ctx, caps, repo)
        .with_context(|| format!("parsing {CONFIG_FILE} file"))?;
    if config.deploy.enable {
        let path = config.deploy.path.clone();
        let data = forge
            .get_contents(ctx, repo, &path)
            .with_context(|| format!("{path} file not found"))?;
        config.load_deployment_map(&String::from_utf8_lossy(&data))?;
    }
    Ok(config)
}

/// Configuration discovery: the repo's own file, then the legacy
/// `.lgtm` file, then the org-wide template repository.
fn find_config(
    forge: &dyn Forge,
    ctx: &Ctx,
    caps: &Capabilities,
    repo: &Repo,
) -> anyhow::Result<Config> {
    let repo_err = match forge.get_contents(ctx, repo, CONFIG_FILE) {
        Ok(data) => return parse_config(&String::from_utf8_lossy(&data), caps),
        Err(err) => err,
    };
    if let Ok(data) = forge.get_contents(ctx, repo, LEGACY_CONFIG_FILE) {
        return parse_legacy_config(&String::from_utf8_lossy(&data));
    }
    if !repo.org {
        return Err(repo_err);
    }
    match forge.get_repo(ctx, &repo.owner, ORG_REPO_NAME) {
        Ok(org_repo) => match forge.get_contents(ctx, &org_repo, CONFIG_TEMPLATE) {
            Ok(data) => parse_config(&String::from_utf8_lossy(&data), caps),
            Err(err) => {
                let mut errs = MultiError::new();
                errs.push(repo_err);
                errs.push(err);
                Err(errs.into())
            }
        },
        Err(err) if severity(&err) == Severity::NotFound => Err(repo_err),
        Err(err) => {
            let mut errs = MultiError::new();
            errs.push(repo_err);
            errs.push(err);
            Err(errs.into())
        }
    }
}

fn find_maintainers(
    forge: &dyn Forge,
    ctx: &Ctx,
    repo: &Repo,
    path: &str,
) -> anyhow::Result<Vec<u8>> {
    let err = match forge.get_contents(ctx, repo, path) {
        Ok(data) => return Ok(data),
        Err(err) => err,
    };
    if repo.org {
        if let Ok(org_repo) = forge.get_repo(ctx, &repo.owner, ORG_REPO_NAME) {
            if let Ok(data) = forge.get_contents(ctx, &org_repo, MAINTAINERS_TEMPLATE) {
                return Ok(data);
            }
        }
    }
    Err(err).with_context(|| format!("{path} file not found"))
}

pub fn create_snapshot(
    forge: &Arc<dyn Forge>,
    ctx: &Ctx,
    caps: &Capabilities,
    repo: &Repo,
    config: &Config,
) -> anyhow::Result<MaintainerSnapshot> {
    let data = find_maintainers(forge.as_ref(), ctx, repo, &config.maintainers.path)?;
    let maintainer = parse_maintainer(
        forge.as_ref(),
        ctx,
        &String::from_utf8_lossy(&data),
        repo,
        config.maintainers.format,
    )
    .with_context(|| {
        format!(
            "parsing maintainers file with {} format",
            config.maintainers.format
        )
    })?;
    let snapshot = maintainer_to_snapshot(forge, ctx, caps, repo, &maintainer)?;
    validate_snapshot(config, &snapshot)?;
    Ok(snapshot)
}

pub fn maintainer_to_snapshot(
    forge: &Arc<dyn Forge>,
    ctx: &Ctx,
    caps: &Capabilities,
    repo: &Repo,
    maintainer: &Maintainer,
) -> anyhow::Result<MaintainerSnapshot> {
    let mut errs = MultiError::new();
    let mut snapshot = MaintainerSnapshot::default();
    for (login, person) in &maintainer.raw_people {
        snapshot.people.insert(login.clone(), person.clone());
    }
    // team-only groups defer expansion when the `_` sentinel is present
    let lazy_teams = maintainer.raw_org.keys().any(|k| k.as_str().starts_with('_'));
    for (name, input) in &maintainer.raw_org {
        if snapshot.people.contains_key(name) {
            errs.push(bad_request(format!(
                "{name} cannot be both a team and a person"
            )));
            continue;
        }
        let single_team = input.people.len() == 1
            && input.people.iter().all(|m| team_directive(m).is_some());
        if lazy_teams && single_team && !name.as_str().starts_with('_') {
            let member = input.people.iter().next().cloned().unwrap_or_default();
            let forge = Arc::clone(forge);
            let ctx = ctx.clone();
            let caps = *caps;
            let repo = repo.clone();
            snapshot.org.insert(
                name.clone(),
                Org::lazy(move || {
                    let people = member_expansion(forge.as_ref(), &ctx, &caps, &repo, &member)?
                        .unwrap_or_default();
                    Ok(people
                        .iter()
                        .map(|p| Login::from(p.login.as_str()))
                        .collect())
                }),
            );
            continue;
        }
        let mut members: BTreeSet<Login> = BTreeSet::new();
        for reference in &input.people {
            match member_expansion(forge.as_ref(), ctx, caps, repo, reference) {
                Ok(Some(people)) => {
                    add_members(&mut snapshot, &people, &mut members);
                }
                Ok(None) => {
                    members.insert(Login::from(reference.as_str()));
                }
                Err(err) => {
                    errs.push(err.context(format!("attempting to expand {reference}")));
                }
            }
        }
        snapshot.org.insert(name.clone(), Org::eager(members));
    }
    errs.into_result()?;
    Ok(snapshot)
}

/// Expands a group directive into people, or returns `None` for a
/// plain login.
fn member_expansion(
    forge: &dyn Forge,
    ctx: &Ctx,
    caps: &Capabilities,
    repo: &Repo,
    reference: &str,
) -> anyhow::Result<Option<Vec<Person>>> {
    if let Some(org) = org_directive(reference) {
        if org == SELF_REPO {
            if !repo.org {
                let person = forge
                    .get_person(ctx, &repo.owner)
                    .context("cannot fetch information about repository owner")?;
                return Ok(Some(vec![person]));
            }
            if !caps.org.read {
                return Err(bad_request(
                    "cannot read organizations with provided OAuth scopes",
                ));
            }
            return Ok(Some(forge.get_org_members(ctx, &repo.owner)?));
        }
        return Ok(Some(forge.get_org_members(ctx, org)?));
    }
    if let Some(collab) = collab_directive(reference) {
        if collab == SELF_REPO {
            return Ok(Some(forge.get_collaborators(ctx, &repo.owner, &repo.name)?));
        }
        let Some((owner, name)) = collab.split_once('/') else {
            return Err(bad_request(format!("{collab} is not a repository slug")));
        };
        return Ok(Some(forge.get_collaborators(ctx, owner, name)?));
    }
    if let Some((team, team_org)) = team_directive(reference) {
        if team_org.is_empty() && !repo.org {
            return Err(bad_request(format!(
                "cannot expand teams for user repository {}",
                repo.slug
            )));
        }
        if !caps.org.read {
            return Err(bad_request("cannot read teams with provided OAuth scopes"));
        }
        let org = if team_org.is_empty() {
            &repo.owner
        } else {
            team_org
        };
        return Ok(Some(forge.get_team_members(ctx, org, team)?));
    }
    Ok(None)
}

fn add_members(snapshot: &mut MaintainerSnapshot, people: &[Person], members: &mut BTreeSet<Login>) {
    for person in people {
        let login = Login::from(person.login.as_str());
        snapshot
            .people
            .entry(login.clone())
            .or_insert_with(|| person.clone());
        members.insert(login);
    }
}

/// Every entity the approval expressions name must exist in the
/// snapshot.
pub fn validate_snapshot(config: &Config, snapshot: &MaintainerSnapshot) -> anyhow::Result<()> {
    let mut errs = MultiError::new();
    for policy in &config.approvals {
        errs.push_result(policy.matcher.validate(snapshot));
        errs.push_result(policy.anti_matcher.validate(snapshot));
        errs.push_result(policy.author_matcher.validate(snapshot));
    }
    errs.into_result()
}
