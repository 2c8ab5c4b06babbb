//! Blocking GitHub REST client behind the [`Forge`] trait.
//!
//! URLs without a scheme are resolved against the API base, so the same
//! client works against github.com and GitHub Enterprise installs.

use std::borrow::Cow;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{bail, Context as _};
use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{
    blocking::{Client, RequestBuilder, Response},
    Method, StatusCode,
};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use hyper_old_types::header::{Link, RelationType};

use pullgate_data::{
    Branch, BranchComparison, CombinedStatus, Comment, Commit, CommitFile, CommitStatus,
    DeploymentInfo, Issue, Login, Person, PullRequest, Repo, Review, ReviewState, StatusState, Tag,
};

use crate::cache::TtlCache;
use crate::ctx::Ctx;
use crate::error;
use crate::forge::{Capabilities, Forge, MergeMethod, OrgCapabilities, RepoCapabilities};
use crate::{COMMENT_PREFIX, SERVICE_TITLE};

/// Display names the forge commits under when a merge is performed
/// through the web interface.
const SYSTEM_COMMITTERS: &[&str] = &["GitHub", "GitHub Enterprise"];

/// Commit statuses silently truncate descriptions past this length.
const STATUS_DESCRIPTION_LIMIT: usize = 135;

struct HttpClient {
    client: Client,
    api_base: String,
}

impl HttpClient {
    fn from_token(token: &SecretString, api_base: String) -> anyhow::Result<Self> {
        let builder = reqwest::blocking::ClientBuilder::default();
        let mut map = HeaderMap::default();
        let mut auth = HeaderValue::from_str(&format!("token {}", token.expose_secret()))?;
        auth.set_sensitive(true);

        map.insert(header::AUTHORIZATION, auth);
        map.insert(
            header::USER_AGENT,
            HeaderValue::from_static(crate::USER_AGENT),
        );

        Ok(Self {
            client: builder.default_headers(map).build()?,
            api_base,
        })
    }

    fn req(&self, method: Method, url: &str) -> RequestBuilder {
        let url = if url.starts_with("https://") {
            Cow::Borrowed(url)
        } else {
            Cow::Owned(format!("{}/{url}", self.api_base))
        };
        trace!("http request: {} {}", method, url);
        self.client.request(method, url.as_ref())
    }

    fn get<T: DeserializeOwned>(&self, url: &str) -> anyhow::Result<T> {
        let resp = self.req(Method::GET, url).send()?;
        resp.custom_error_for_status()?
            .json_annotated()
            .with_context(|| format!("Failed to decode response body on GET request to '{url}'"))
    }

    /// Like [`HttpClient::get`] but maps a 404 to `None`.
    fn get_option<T: DeserializeOwned>(&self, url: &str) -> anyhow::Result<Option<T>> {
        let resp = self.req(Method::GET, url).send()?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            _ => Ok(Some(
                resp.custom_error_for_status()?
                    .json_annotated()
                    .with_context(|| {
                        format!("Failed to decode response body on GET request to '{url}'")
                    })?,
            )),
        }
    }

    fn send<T: Serialize + std::fmt::Debug>(
        &self,
        method: Method,
        url: &str,
        body: &T,
    ) -> anyhow::Result<Response> {
        let resp = self.req(method, url).json(body).send()?;
        resp.custom_error_for_status()
    }

    fn rest_paginated<F, T>(&self, method: &Method, url: String, mut f: F) -> anyhow::Result<()>
    where
        F: FnMut(Vec<T>) -> anyhow::Result<()>,
        T: DeserializeOwned,
    {
        let mut next = Some(url);
        while let Some(next_url) = next.take() {
            let resp = self
                .req(method.clone(), &next_url)
                .send()?
                .custom_error_for_status()?;

            // Extract the next page
            if let Some(links) = resp.headers().get(header::LINK) {
                let links: Link = links.to_str()?.parse()?;
                for link in links.values() {
                    if link
                        .rel()
                        .map(|r| r.iter().any(|r| *r == RelationType::Next))
                        .unwrap_or(false)
                    {
                        next = Some(link.link().to_string());
                        break;
                    }
                }
            }

            f(resp.json().with_context(|| {
                format!("Failed to deserialize response body for {method} request to '{next_url}'")
            })?)?;
        }
        Ok(())
    }
}

trait ResponseExt {
    fn custom_error_for_status(self) -> anyhow::Result<Response>;
    fn json_annotated<T: DeserializeOwned>(self) -> anyhow::Result<T>;
}

impl ResponseExt for Response {
    fn custom_error_for_status(self) -> anyhow::Result<Response> {
        match self.error_for_status_ref() {
            Ok(_) => Ok(self),
            Err(err) => {
                let body = self.text()?;
                Err(err).context(format!("Body: {:?}", body))
            }
        }
    }

    /// Try to load the response as JSON. If it fails, include the response
    /// body as text in the error message, so that it is easier to understand
    /// what was the problem.
    fn json_annotated<T: DeserializeOwned>(self) -> anyhow::Result<T> {
        let text = self.text()?;

        serde_json::from_str::<T>(&text).with_context(|| {
            // Try to at least deserialize as generic JSON, to provide a more
            // readable visualization of the response body.
            let body_content = serde_json::Value::from_str(&text)
                .and_then(|v| serde_json::to_string_pretty(&v))
                .unwrap_or(text);

            format!(
                "Cannot deserialize type `{}` from the following response body:\n{body_content}",
                std::any::type_name::<T>(),
            )
        })
    }
}

pub struct GithubClient {
    http: HttpClient,
    /// Base URL of the web interface, used for compare links.
    web_base: String,
    capabilities: Mutex<Option<Capabilities>>,
    /// Organization and team membership, cached between hook deliveries.
    members: TtlCache<Vec<Person>>,
}

impl GithubClient {
    /// Connects to github.com with the given token.
    pub fn new(token: &SecretString) -> anyhow::Result<Self> {
        Self::with_host(
            token,
            "https://api.github.com".into(),
            "https://github.com".into(),
        )
    }

    /// Connects to a GitHub Enterprise install rooted at `web_base`.
    pub fn enterprise(token: &SecretString, web_base: &str) -> anyhow::Result<Self> {
        let web_base = web_base.trim_end_matches('/').to_string();
        Self::with_host(token, format!("{web_base}/api/v3"), web_base)
    }

    fn with_host(token: &SecretString, api_base: String, web_base: String) -> anyhow::Result<Self> {
        Ok(GithubClient {
            http: HttpClient::from_token(token, api_base)?,
            web_base,
            capabilities: Mutex::new(None),
            members: TtlCache::with_default_ttl(),
        })
    }

    /// Reads the OAuth scopes granted to the token and maps them onto the
    /// operations the service may need. The commit status scope is not
    /// optional since every evaluation reports through a status.
    fn fetch_capabilities(&self) -> anyhow::Result<Capabilities> {
        let resp = self
            .http
            .req(Method::GET, "user")
            .send()?
            .custom_error_for_status()?;
        let scopes: Vec<String> = resp
            .headers()
            .get("x-oauth-scopes")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        debug!("token scopes: {scopes:?}");

        let has = |scope: &str| scopes.iter().any(|s| s == scope);
        let repo = has("repo") || has("public_repo");
        let caps = Capabilities {
            org: OrgCapabilities {
                read: has("read:org") || has("write:org") || has("admin:org"),
            },
            repo: RepoCapabilities {
                tag: repo,
                merge: repo,
                delete_branch: repo,
                commit_status: has("repo:status") || repo,
                pr_write_comment: repo,
                deployment_status: has("repo_deployment") || repo,
            },
        };
        if !caps.repo.commit_status {
            bail!("commit status OAuth scope is required");
        }
        Ok(caps)
    }

    fn collect_paginated<T: DeserializeOwned>(&self, url: String) -> anyhow::Result<Vec<T>> {
        let mut out = Vec::new();
        self.http.rest_paginated(&Method::GET, url, |mut page| {
            out.append(&mut page);
            Ok(())
        })?;
        Ok(out)
    }

    fn get_pull(&self, repo: &Repo, number: u32) -> anyhow::Result<WirePull> {
        self.http
            .get(&format!("repos/{}/pulls/{number}", repo.slug))
            .with_context(|| format!("failed to fetch pr {number} from {}", repo.slug))
    }

    fn get_wire_commit(&self, repo: &Repo, sha: &str) -> anyhow::Result<WireCommit> {
        self.http.get(&format!("repos/{}/commits/{sha}", repo.slug))
    }

    /// The head commit of a pull request. With `ignore_ui_merge` the head
    /// is walked past merges created through the web interface, so that a
    /// base branch merge does not reset the approval window.
    fn get_head(
        &self,
        repo: &Repo,
        number: u32,
        ignore_ui_merge: bool,
    ) -> anyhow::Result<WireCommit> {
        let pull = self.get_pull(repo, number)?;
        let commit = self.get_wire_commit(repo, &pull.head.sha)?;
        if ignore_ui_merge {
            self.walk_past_ui_merges(repo, &pull, commit)
        } else {
            Ok(commit)
        }
    }

    /// Finds the first head commit that is not a merge created through the
    /// user interface. Commits that landed on the base branch after the
    /// pull request was opened are the ones to skip over.
    fn walk_past_ui_merges(
        &self,
        repo: &Repo,
        pull: &WirePull,
        commit: WireCommit,
    ) -> anyhow::Result<WireCommit> {
        if !is_ui_merge(&commit) {
            return Ok(commit);
        }

        let mut base_shas = HashSet::new();
        self.http.rest_paginated(
            &Method::GET,
            format!(
                "repos/{}/commits?sha={}&since={}&per_page=100",
                repo.slug,
                pull.base.name,
                pull.created_at.to_rfc3339(),
            ),
            |page: Vec<WireCommit>| {
                base_shas.extend(page.into_iter().map(|c| c.sha));
                Ok(())
            },
        )?;

        let mut commit = commit;
        while is_ui_merge(&commit) {
            let left = &commit.parents[0].sha;
            let right = &commit.parents[1].sha;
            // Ambiguous parentage: both or neither side came from the base
            // branch, so there is nothing safe to follow.
            let target = match (base_shas.contains(left), base_shas.contains(right)) {
                (true, false) => right,
                (false, true) => left,
                _ => return Ok(commit),
            };
            commit = self.get_wire_commit(repo, target)?;
        }
        Ok(commit)
    }

    fn head_committer_date(
        &self,
        repo: &Repo,
        number: u32,
        ignore_ui_merge: bool,
    ) -> anyhow::Result<DateTime<Utc>> {
        let head = self.get_head(repo, number, ignore_ui_merge)?;
        Ok(head.commit.committer.date)
    }

    fn fetch_reviews(&self, repo: &Repo, number: u32) -> anyhow::Result<Vec<Review>> {
        let wire: Vec<WireReview> = self.collect_paginated(format!(
            "repos/{}/pulls/{number}/reviews?per_page=100",
            repo.slug
        ))?;
        Ok(wire
            .into_iter()
            .filter_map(WireReview::into_review)
            .collect())
    }
}

fn is_ui_merge(commit: &WireCommit) -> bool {
    commit.parents.len() == 2
        && SYSTEM_COMMITTERS.contains(&commit.commit.committer.name.as_str())
}

impl Forge for GithubClient {
    fn capabilities(&self) -> anyhow::Result<Capabilities> {
        let mut cached = self
            .capabilities
            .lock()
            .map_err(|_| anyhow::anyhow!("capability cache poisoned"))?;
        if let Some(caps) = *cached {
            return Ok(caps);
        }
        let caps = self.fetch_capabilities()?;
        *cached = Some(caps);
        Ok(caps)
    }

    fn get_person(&self, _ctx: &Ctx, login: &str) -> anyhow::Result<Person> {
        let user: WireUser = self.http.get(&format!("users/{login}"))?;
        Ok(user.into_person())
    }

    fn get_org_members(&self, ctx: &Ctx, org: &str) -> anyhow::Result<Vec<Person>> {
        ctx.check_cancelled()?;
        self.members.get_or_insert_with(&format!("org:{org}"), || {
            let members: Vec<WireUser> =
                self.collect_paginated(format!("orgs/{org}/members?per_page=100"))?;
            Ok(members.into_iter().map(WireUser::into_person).collect())
        })
    }

    fn get_collaborators(&self, ctx: &Ctx, owner: &str, name: &str) -> anyhow::Result<Vec<Person>> {
        ctx.check_cancelled()?;
        self.members
            .get_or_insert_with(&format!("collab:{owner}/{name}"), || {
                let members: Vec<WireUser> = self.collect_paginated(format!(
                    "repos/{owner}/{name}/collaborators?per_page=100"
                ))?;
                Ok(members.into_iter().map(WireUser::into_person).collect())
            })
    }

    fn get_team_members(&self, ctx: &Ctx, org: &str, team: &str) -> anyhow::Result<Vec<Person>> {
        ctx.check_cancelled()?;
        self.members
            .get_or_insert_with(&format!("team:{org}/{team}"), || {
                let members: Vec<WireUser> = self.collect_paginated(format!(
                    "orgs/{org}/teams/{team}/members?per_page=100"
                ))?;
                Ok(members.into_iter().map(WireUser::into_person).collect())
            })
    }

    fn list_teams(&self, _ctx: &Ctx, org: &str) -> anyhow::Result<Vec<String>> {
        let teams: Vec<WireTeam> =
            self.collect_paginated(format!("orgs/{org}/teams?per_page=100"))?;
        Ok(teams.into_iter().map(|t| t.slug).collect())
    }

    fn get_repo(&self, _ctx: &Ctx, owner: &str, name: &str) -> anyhow::Result<Repo> {
        let repo: WireRepo = self
            .http
            .get_option(&format!("repos/{owner}/{name}"))?
            .ok_or_else(|| error::not_found(format!("repository {owner}/{name} not found")))?;
        Ok(repo.into_repo())
    }

    fn get_contents(&self, _ctx: &Ctx, repo: &Repo, path: &str) -> anyhow::Result<Vec<u8>> {
        let url = format!("repos/{}/contents/{path}", repo.slug);
        let resp = self
            .http
            .req(Method::GET, &url)
            .header(header::ACCEPT, "application/vnd.github.raw")
            .send()?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(error::not_found(format!("no file {path} in {}", repo.slug)));
        }
        Ok(resp.custom_error_for_status()?.bytes()?.to_vec())
    }

    fn get_pull_request(&self, _ctx: &Ctx, repo: &Repo, number: u32) -> anyhow::Result<PullRequest> {
        Ok(self.get_pull(repo, number)?.into_pull_request())
    }

    fn get_pull_request_files(
        &self,
        _ctx: &Ctx,
        repo: &Repo,
        number: u32,
    ) -> anyhow::Result<Vec<CommitFile>> {
        let files: Vec<WireFile> = self.collect_paginated(format!(
            "repos/{}/pulls/{number}/files?per_page=100",
            repo.slug
        ))?;
        Ok(files
            .into_iter()
            .map(|f| CommitFile { filename: f.filename })
            .collect())
    }

    fn get_pull_request_commits(
        &self,
        _ctx: &Ctx,
        repo: &Repo,
        number: u32,
    ) -> anyhow::Result<Vec<Commit>> {
        let commits: Vec<WireCommit> = self.collect_paginated(format!(
            "repos/{}/pulls/{number}/commits?per_page=100",
            repo.slug
        ))?;
        Ok(commits.into_iter().map(WireCommit::into_commit).collect())
    }

    fn get_pull_requests_for_commit(
        &self,
        _ctx: &Ctx,
        repo: &Repo,
        sha: &str,
    ) -> anyhow::Result<Vec<PullRequest>> {
        let pulls: Vec<WirePull> = self.collect_paginated(format!(
            "repos/{}/commits/{sha}/pulls?per_page=100",
            repo.slug
        ))?;
        Ok(pulls.into_iter().map(WirePull::into_pull_request).collect())
    }

    fn merge_pull_request(
        &self,
        _ctx: &Ctx,
        repo: &Repo,
        pr: &PullRequest,
        message: &str,
        method: MergeMethod,
    ) -> anyhow::Result<String> {
        #[derive(Debug, Serialize)]
        struct Req<'a> {
            commit_message: &'a str,
            merge_method: &'a str,
        }
        let result: WireMergeResult = self
            .http
            .send(
                Method::PUT,
                &format!("repos/{}/pulls/{}/merge", repo.slug, pr.number),
                &Req {
                    commit_message: message,
                    merge_method: method.as_str(),
                },
            )?
            .json_annotated()?;
        if !result.merged {
            bail!(
                "pr {} was not merged: {}",
                pr.number,
                result.message.unwrap_or_default()
            );
        }
        result
            .sha
            .ok_or_else(|| anyhow::anyhow!("merge response carried no commit sha"))
    }

    fn compare_branches(
        &self,
        _ctx: &Ctx,
        repo: &Repo,
        base: &str,
        head: &str,
    ) -> anyhow::Result<BranchComparison> {
        let cmp: WireComparison = self
            .http
            .get(&format!("repos/{}/compare/{base}...{head}", repo.slug))?;
        Ok(BranchComparison {
            ahead_by: cmp.ahead_by,
            behind_by: cmp.behind_by,
        })
    }

    fn delete_branch(&self, _ctx: &Ctx, repo: &Repo, branch: &str) -> anyhow::Result<()> {
        let url = format!("repos/{}/git/refs/heads/{branch}", repo.slug);
        self.http
            .req(Method::DELETE, &url)
            .send()?
            .custom_error_for_status()?;
        Ok(())
    }

    fn get_commit(&self, _ctx: &Ctx, repo: &Repo, sha: &str) -> anyhow::Result<Commit> {
        Ok(self.get_wire_commit(repo, sha)?.into_commit())
    }

    fn list_commits(
        &self,
        ctx: &Ctx,
        repo: &Repo,
        branch: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Commit>> {
        ctx.check_cancelled()?;
        // Callers only look at a short window, one page is enough.
        let commits: Vec<WireCommit> = self.http.get(&format!(
            "repos/{}/commits?sha={branch}&per_page={}",
            repo.slug,
            limit.min(100)
        ))?;
        Ok(commits
            .into_iter()
            .take(limit)
            .map(WireCommit::into_commit)
            .collect())
    }

    fn create_empty_commit(
        &self,
        _ctx: &Ctx,
        repo: &Repo,
        sha: &str,
        message: &str,
    ) -> anyhow::Result<String> {
        #[derive(Deserialize)]
        struct GitCommit {
            tree: WireObject,
        }
        #[derive(Debug, Serialize)]
        struct Req<'a> {
            message: &'a str,
            tree: &'a str,
            parents: [&'a str; 1],
        }
        let prev: GitCommit = self
            .http
            .get(&format!("repos/{}/git/commits/{sha}", repo.slug))?;
        let created: WireObject = self
            .http
            .send(
                Method::POST,
                &format!("repos/{}/git/commits", repo.slug),
                &Req {
                    message,
                    tree: &prev.tree.sha,
                    parents: [sha],
                },
            )?
            .json_annotated()?;
        Ok(created.sha)
    }

    fn create_reference(&self, _ctx: &Ctx, repo: &Repo, sha: &str, name: &str) -> anyhow::Result<()> {
        #[derive(Debug, Serialize)]
        struct Req<'a> {
            r#ref: String,
            sha: &'a str,
        }
        let full = if name.starts_with("refs/") {
            name.to_string()
        } else {
            format!("refs/{name}")
        };
        self.http.send(
            Method::POST,
            &format!("repos/{}/git/refs", repo.slug),
            &Req { r#ref: full, sha },
        )?;
        Ok(())
    }

    fn create_pull_request(
        &self,
        _ctx: &Ctx,
        repo: &Repo,
        base: &str,
        head: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<PullRequest> {
        #[derive(Debug, Serialize)]
        struct Req<'a> {
            title: &'a str,
            head: &'a str,
            base: &'a str,
            body: &'a str,
        }
        let pull: WirePull = self
            .http
            .send(
                Method::POST,
                &format!("repos/{}/pulls", repo.slug),
                &Req { title, head, base, body },
            )?
            .json_annotated()?;
        Ok(pull.into_pull_request())
    }

    fn compare_url(&self, repo: &Repo, from: &str, to: &str) -> String {
        format!("{}/{}/compare/{from}...{to}", self.web_base, repo.slug)
    }

    fn list_tags(&self, _ctx: &Ctx, repo: &Repo) -> anyhow::Result<Vec<Tag>> {
        #[derive(Deserialize)]
        struct WireTag {
            name: String,
        }
        let tags: Vec<WireTag> =
            self.collect_paginated(format!("repos/{}/tags?per_page=100", repo.slug))?;
        Ok(tags.into_iter().map(|t| Tag(t.name)).collect())
    }

    fn tag(&self, ctx: &Ctx, repo: &Repo, tag: &Tag, sha: &str) -> anyhow::Result<()> {
        #[derive(Debug, Serialize)]
        struct Tagger<'a> {
            name: &'a str,
            email: &'a str,
            date: String,
        }
        #[derive(Debug, Serialize)]
        struct Req<'a> {
            tag: &'a str,
            message: String,
            object: &'a str,
            r#type: &'static str,
            tagger: Tagger<'a>,
        }
        let created: WireObject = self
            .http
            .send(
                Method::POST,
                &format!("repos/{}/git/tags", repo.slug),
                &Req {
                    tag: &tag.0,
                    message: format!("Tagged by {SERVICE_TITLE}"),
                    object: sha,
                    r#type: "commit",
                    tagger: Tagger {
                        name: SERVICE_TITLE,
                        email: "pullgate@users.noreply.github.com",
                        date: Utc::now().to_rfc3339(),
                    },
                },
            )?
            .json_annotated()?;
        self.create_reference(ctx, repo, &created.sha, &format!("tags/{tag}"))
    }

    fn get_status(&self, _ctx: &Ctx, repo: &Repo, sha: &str) -> anyhow::Result<CombinedStatus> {
        let combined: WireCombined = self
            .http
            .get(&format!("repos/{}/commits/{sha}/status", repo.slug))?;
        Ok(combined.into_combined())
    }

    fn has_required_status(
        &self,
        _ctx: &Ctx,
        repo: &Repo,
        branch: &str,
        sha: &str,
    ) -> anyhow::Result<bool> {
        let combined: WireCombined = self
            .http
            .get(&format!("repos/{}/commits/{sha}/status", repo.slug))?;
        if combined.state != "success" {
            return Ok(false);
        }
        debug!("overall status is success, checking individual status checks");
        #[derive(Deserialize)]
        struct RequiredChecks {
            #[serde(default)]
            contexts: Vec<String>,
        }
        // Branches without protection rules have no required checks.
        let required: Option<RequiredChecks> = self.http.get_option(&format!(
            "repos/{}/branches/{branch}/protection/required_status_checks",
            repo.slug
        ))?;
        let have: HashSet<&str> = combined
            .statuses
            .iter()
            .map(|s| s.context.as_str())
            .collect();
        if let Some(required) = required {
            if required.contexts.iter().any(|c| !have.contains(c.as_str())) {
                return Ok(false);
            }
        }
        Ok(combined
            .statuses
            .iter()
            .all(|s| s.state == StatusState::Success))
    }

    fn set_status(
        &self,
        _ctx: &Ctx,
        repo: &Repo,
        sha: &str,
        status: &CommitStatus,
    ) -> anyhow::Result<()> {
        #[derive(Debug, Serialize)]
        struct Req<'a> {
            state: String,
            context: &'a str,
            description: String,
        }
        let mut description = status.description.clone();
        if description.chars().count() > STATUS_DESCRIPTION_LIMIT {
            description = description
                .chars()
                .take(STATUS_DESCRIPTION_LIMIT)
                .collect::<String>()
                + "...";
        }
        self.http.send(
            Method::POST,
            &format!("repos/{}/statuses/{sha}", repo.slug),
            &Req {
                state: status.state.to_string(),
                context: &status.context,
                description,
            },
        )?;
        Ok(())
    }

    fn get_all_comments(&self, _ctx: &Ctx, repo: &Repo, number: u32) -> anyhow::Result<Vec<Comment>> {
        let wire: Vec<WireComment> = self.collect_paginated(format!(
            "repos/{}/issues/{number}/comments?per_page=100",
            repo.slug
        ))?;
        Ok(wire.into_iter().map(WireComment::into_comment).collect())
    }

    fn get_comments_since_head(
        &self,
        _ctx: &Ctx,
        repo: &Repo,
        number: u32,
        ignore_ui_merge: bool,
    ) -> anyhow::Result<Vec<Comment>> {
        let since = self.head_committer_date(repo, number, ignore_ui_merge)?;
        let wire: Vec<WireComment> = self.collect_paginated(format!(
            "repos/{}/issues/{number}/comments?per_page=100&since={}",
            repo.slug,
            since.to_rfc3339(),
        ))?;
        Ok(wire.into_iter().map(WireComment::into_comment).collect())
    }

    fn get_all_reviews(&self, _ctx: &Ctx, repo: &Repo, number: u32) -> anyhow::Result<Vec<Review>> {
        self.fetch_reviews(repo, number)
    }

    fn get_reviews_since_head(
        &self,
        _ctx: &Ctx,
        repo: &Repo,
        number: u32,
        ignore_ui_merge: bool,
    ) -> anyhow::Result<Vec<Review>> {
        let since = self.head_committer_date(repo, number, ignore_ui_merge)?;
        let all = self.fetch_reviews(repo, number)?;
        Ok(all.into_iter().filter(|r| r.submitted_at > since).collect())
    }

    fn write_comment(&self, _ctx: &Ctx, repo: &Repo, number: u32, body: &str) -> anyhow::Result<()> {
        #[derive(Debug, Serialize)]
        struct Req {
            body: String,
        }
        self.http.send(
            Method::POST,
            &format!("repos/{}/issues/{number}/comments", repo.slug),
            &Req {
                body: format!("{COMMENT_PREFIX} {body}"),
            },
        )?;
        Ok(())
    }

    fn is_head_ui_merge(&self, _ctx: &Ctx, repo: &Repo, number: u32) -> anyhow::Result<bool> {
        let head = self.get_head(repo, number, false)?;
        Ok(is_ui_merge(&head))
    }

    fn get_issue(&self, _ctx: &Ctx, repo: &Repo, number: u32) -> anyhow::Result<Issue> {
        let issue: WireIssue = self
            .http
            .get(&format!("repos/{}/issues/{number}", repo.slug))?;
        Ok(Issue {
            number: issue.number,
            title: issue.title,
            author: issue.user.login.into(),
        })
    }

    fn schedule_deployment(
        &self,
        _ctx: &Ctx,
        repo: &Repo,
        deployment: &DeploymentInfo,
    ) -> anyhow::Result<()> {
        #[derive(Debug, Serialize)]
        struct Req<'a> {
            r#ref: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            task: Option<&'a str>,
            environment: &'a str,
        }
        self.http.send(
            Method::POST,
            &format!("repos/{}/deployments", repo.slug),
            &Req {
                r#ref: &deployment.reference,
                task: deployment.task.as_deref(),
                environment: &deployment.environment,
            },
        )?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WireUser {
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl WireUser {
    fn into_person(self) -> Person {
        Person {
            name: self.name.unwrap_or_default(),
            email: self.email.unwrap_or_default(),
            login: self.login.to_lowercase(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireTeam {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct WireRepoOwner {
    login: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct WireRepo {
    name: String,
    owner: WireRepoOwner,
    #[serde(default)]
    private: bool,
}

impl WireRepo {
    fn into_repo(self) -> Repo {
        let org = self.owner.kind == "Organization";
        let mut repo = Repo::new(&self.owner.login, &self.name, org);
        repo.private = self.private;
        repo
    }
}

#[derive(Debug, Deserialize)]
struct WireRef {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
    #[serde(default)]
    user: Option<WireUser>,
    #[serde(default)]
    repo: Option<WireRepo>,
}

#[derive(Debug, Deserialize)]
struct WirePull {
    number: u32,
    title: String,
    #[serde(default)]
    body: Option<String>,
    user: WireUser,
    base: WireRef,
    head: WireRef,
    #[serde(default)]
    mergeable: Option<bool>,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    merge_commit_sha: Option<String>,
    created_at: DateTime<Utc>,
}

impl WirePull {
    fn into_pull_request(self) -> PullRequest {
        let compare_owner = self
            .head
            .repo
            .as_ref()
            .map(|r| r.owner.login.clone())
            .or_else(|| self.head.user.as_ref().map(|u| u.login.clone()))
            .unwrap_or_default();
        PullRequest {
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            author: self.user.login.into(),
            branch: Branch {
                base_name: self.base.name,
                base_sha: self.base.sha,
                compare_name: self.head.name,
                compare_sha: self.head.sha,
                compare_owner,
                // An unknown mergeable state is treated as mergeable, the
                // merge call itself is the authority.
                mergeable: self.mergeable.unwrap_or(true),
                merged: self.merged,
                merge_commit_sha: self.merge_commit_sha,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireIssue {
    number: u32,
    title: String,
    user: WireUser,
}

#[derive(Debug, Deserialize)]
struct WireComment {
    user: WireUser,
    #[serde(default)]
    body: Option<String>,
    created_at: DateTime<Utc>,
}

impl WireComment {
    fn into_comment(self) -> Comment {
        Comment {
            author: self.user.login.into(),
            body: self.body.unwrap_or_default(),
            submitted_at: self.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireReview {
    id: u64,
    user: Option<WireUser>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
    state: String,
}

impl WireReview {
    /// Reviews without an author show up when accounts are deleted; they
    /// cannot count toward approval and are dropped.
    fn into_review(self) -> Option<Review> {
        let user = match self.user {
            Some(user) => user,
            None => {
                warn!("dropping review {} with no author", self.id);
                return None;
            }
        };
        let state = match self.state.as_str() {
            "APPROVED" => ReviewState::Approved,
            "CHANGES_REQUESTED" => ReviewState::ChangesRequested,
            "COMMENTED" => ReviewState::Commented,
            "DISMISSED" => ReviewState::Dismissed,
            "PENDING" => ReviewState::Pending,
            other => {
                warn!("dropping review {} with unknown state {other:?}", self.id);
                return None;
            }
        };
        Some(Review {
            id: self.id,
            author: Login::from(user.login),
            body: self.body.unwrap_or_default(),
            submitted_at: self.submitted_at.unwrap_or(DateTime::UNIX_EPOCH),
            state,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireGitPerson {
    #[serde(default)]
    name: String,
    date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct WireGitCommit {
    message: String,
    author: WireGitPerson,
    committer: WireGitPerson,
}

#[derive(Debug, Deserialize)]
struct WireObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct WireCommit {
    sha: String,
    commit: WireGitCommit,
    #[serde(default)]
    author: Option<WireUser>,
    #[serde(default)]
    parents: Vec<WireObject>,
}

impl WireCommit {
    fn into_commit(self) -> Commit {
        // Commits without a linked account fall back to the git author name.
        let author = self
            .author
            .map(|u| Login::from(u.login))
            .unwrap_or_else(|| Login::new(&self.commit.author.name));
        Commit {
            sha: self.sha,
            author,
            committer: self.commit.committer.name,
            message: self.commit.message,
            parents: self.parents.into_iter().map(|p| p.sha).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    state: StatusState,
    context: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCombined {
    state: String,
    sha: String,
    statuses: Vec<WireStatus>,
}

impl WireCombined {
    fn into_combined(self) -> CombinedStatus {
        let mut combined = CombinedStatus {
            sha: self.sha,
            statuses: Default::default(),
        };
        for status in self.statuses {
            combined.statuses.insert(
                status.context.clone(),
                CommitStatus {
                    state: status.state,
                    context: status.context,
                    description: status.description.unwrap_or_default(),
                },
            );
        }
        combined
    }
}

#[derive(Debug, Deserialize)]
struct WireComparison {
    ahead_by: u32,
    behind_by: u32,
}

#[derive(Debug, Deserialize)]
struct WireMergeResult {
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_requests_stop_before_member_lookups() {
        let client = GithubClient::new(&SecretString::from("token")).unwrap();
        let ctx = crate::test_utils::test_ctx();
        ctx.cancel();
        let err = client.get_org_members(&ctx, "octo").unwrap_err();
        assert_eq!(err.to_string(), "request cancelled");
    }

    #[test]
    fn pull_request_wire_mapping() {
        let raw = serde_json::json!({
            "number": 42,
            "title": "Add frobnicator",
            "body": "fixes #7",
            "user": {"login": "OctoCat"},
            "base": {"ref": "master", "sha": "base0", "repo": {
                "name": "widgets", "owner": {"login": "octo", "type": "Organization"}
            }},
            "head": {"ref": "feature", "sha": "head0", "repo": {
                "name": "widgets", "owner": {"login": "forker", "type": "User"}
            }},
            "mergeable": null,
            "merged": false,
            "merge_commit_sha": null,
            "created_at": "2020-01-01T00:00:00Z"
        });
        let pull: WirePull = serde_json::from_value(raw).unwrap();
        let pr = pull.into_pull_request();
        assert_eq!(pr.number, 42);
        assert_eq!(pr.author.as_str(), "octocat");
        assert_eq!(pr.branch.compare_owner, "forker");
        assert!(pr.branch.mergeable);
        assert!(!pr.branch.merged);
    }

    #[test]
    fn review_state_mapping() {
        let raw = serde_json::json!({
            "id": 9,
            "user": {"login": "alice"},
            "body": "looks wrong",
            "submitted_at": "2020-01-02T03:04:05Z",
            "state": "CHANGES_REQUESTED"
        });
        let review: WireReview = serde_json::from_value(raw).unwrap();
        let review = review.into_review().unwrap();
        assert_eq!(review.state, ReviewState::ChangesRequested);
        assert_eq!(review.author.as_str(), "alice");
    }

    #[test]
    fn authorless_reviews_are_dropped() {
        let raw = serde_json::json!({
            "id": 10,
            "user": null,
            "state": "APPROVED"
        });
        let review: WireReview = serde_json::from_value(raw).unwrap();
        assert!(review.into_review().is_none());
    }

    #[test]
    fn ui_merge_detection() {
        let raw = serde_json::json!({
            "sha": "abc",
            "commit": {
                "message": "Merge branch 'master' into feature",
                "author": {"name": "Alice", "date": "2020-01-01T00:00:00Z"},
                "committer": {"name": "GitHub", "date": "2020-01-01T00:00:00Z"}
            },
            "author": null,
            "parents": [{"sha": "p1"}, {"sha": "p2"}]
        });
        let commit: WireCommit = serde_json::from_value(raw).unwrap();
        assert!(is_ui_merge(&commit));

        let converted = commit.into_commit();
        assert_eq!(converted.author.as_str(), "alice");
        assert_eq!(converted.committer, "GitHub");
        assert_eq!(converted.parents, vec!["p1", "p2"]);
    }

    #[test]
    fn combined_status_keyed_by_context() {
        let raw = serde_json::json!({
            "state": "success",
            "sha": "abc",
            "statuses": [
                {"state": "success", "context": "ci/build", "description": "ok"},
                {"state": "pending", "context": "pullgate", "description": null}
            ]
        });
        let combined: WireCombined = serde_json::from_value(raw).unwrap();
        let combined = combined.into_combined();
        assert_eq!(combined.statuses["ci/build"].state, StatusState::Success);
        assert_eq!(combined.statuses["pullgate"].description, "");
    }
}
