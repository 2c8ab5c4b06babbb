//! The HJSON MAINTAINERS dialect: explicit `people` and `org`
//! sections.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use pullgate_data::{Login, Person};
use serde::Deserialize;

use crate::error::{bad_request, MultiError};

use super::{Maintainer, OrgInput, RESERVED_ORGS};

#[derive(Debug, Default, Deserialize)]
struct RawMaintainer {
    #[serde(default)]
    people: Option<IndexMap<String, Person>>,
    #[serde(default)]
    org: Option<IndexMap<String, RawOrg>>,
}

#[derive(Debug, Deserialize)]
struct RawOrg {
    #[serde(default)]
    people: BTreeSet<String>,
}

pub(super) fn parse(data: &str) -> anyhow::Result<Maintainer> {
    let raw: RawMaintainer = deser_hjson::from_str(data).map_err(|err| bad_request(err.to_string()))?;
    build(raw)
}

pub(super) fn parse_toml(data: &str) -> anyhow::Result<Maintainer> {
    let raw: RawMaintainer = ::toml::from_str(data).map_err(|err| bad_request(err.to_string()))?;
    build(raw)
}

fn build(raw: RawMaintainer) -> anyhow::Result<Maintainer> {
    let Some(people) = raw.people else {
        return Err(bad_request("missing people section"));
    };
    let mut errs = MultiError::new();
    let mut m = Maintainer::default();
    for (key, mut person) in people {
        if person.login.is_empty() {
            person.login = key.clone();
        } else if person.login != key {
            errs.push(bad_request(format!(
                "mismatched key {key} and login field {}",
                person.login
            )));
        }
        m.raw_people.insert(Login::from(key.as_str()), person);
    }
    for (key, org) in raw.org.unwrap_or_default() {
        let name = Login::from(key.as_str());
        if RESERVED_ORGS.contains(&name.as_str()) {
            errs.push(bad_request(format!(
                "the organization name {name} is a reserved name"
            )));
        }
        m.raw_org.insert(name, OrgInput { people: org.people });
    }
    errs.into_result()?;
    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_people_and_orgs() {
        let m = parse(
            r#"{
              people: {
                alice: { name: "Alice", email: "alice@example.com" }
                bob: {}
              }
              org: {
                core: { people: [ "alice", "bob" ] }
              }
            }"#,
        )
        .unwrap();
        assert_eq!(m.raw_people[&Login::from("alice")].login, "alice");
        assert!(m.raw_org[&Login::from("core")].people.contains("bob"));
    }

    #[test]
    fn missing_people_section_is_an_error() {
        let err = parse("{ org: {} }").unwrap_err();
        assert!(err.to_string().contains("missing people section"));
    }

    #[test]
    fn mismatched_login_is_an_error() {
        let err = parse(r#"{ people: { alice: { login: "mallory" } } }"#).unwrap_err();
        assert!(err.to_string().contains("mismatched key"));
    }

    #[test]
    fn reserved_group_names_are_rejected() {
        let err = parse(
            r#"{
              people: { alice: {} }
              org: { all: { people: [ "alice" ] } }
            }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("reserved name"));
    }
}
