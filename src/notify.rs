//! Outbound notifications. Events accumulate into a per-pull-request
//! batch that is fanned out to the configured targets, each target
//! filtering by message kind and title pattern.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::ctx::Ctx;
use crate::forge::Forge;

/// What happened, for target-side filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Error,
    Open,
    Close,
    Accept,
    Approve,
    Block,
    Reset,
    #[serde(rename = "push-ignore")]
    PushIgnore,
    Merge,
    Tag,
    Delete,
    Deploy,
    Author,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageHeader {
    pub pr_title: String,
    pub pr_number: u32,
    pub slug: String,
}

#[derive(Debug, Clone)]
pub struct MessageInfo {
    pub message: String,
    pub kind: MessageKind,
}

/// Messages for one pull request, delivered together.
#[derive(Debug, Clone, Default)]
pub struct MessageBatch {
    pub header: MessageHeader,
    pub messages: Vec<MessageInfo>,
}

impl MessageBatch {
    pub fn new(pr_title: &str, pr_number: u32, slug: &str) -> MessageBatch {
        MessageBatch {
            header: MessageHeader {
                pr_title: pr_title.to_string(),
                pr_number,
                slug: slug.to_string(),
            },
            messages: Vec::new(),
        }
    }

    pub fn error(pr_title: &str, pr_number: u32, slug: &str, message: &str) -> MessageBatch {
        let mut batch = MessageBatch::new(pr_title, pr_number, slug);
        batch.push(MessageKind::Error, message);
        batch
    }

    pub fn push(&mut self, kind: MessageKind, message: impl Into<String>) {
        self.messages.push(MessageInfo {
            message: message.into(),
            kind,
        });
    }

    /// Batches for different pull requests must never be merged.
    pub fn merge(&mut self, other: MessageBatch) {
        if self.header.pr_number != other.header.pr_number
            || self.header.pr_title != other.header.pr_title
        {
            warn!(
                "attempted to merge message batches for different pull requests: {:?}, {:?}",
                self.header, other.header
            );
            return;
        }
        self.messages.extend(other.messages);
    }
}

pub trait Sender: Send + Sync {
    fn prefix(&self, header: &MessageHeader) -> String;
    fn send(&self, ctx: &Ctx, header: &MessageHeader, message: &str, names: &[String], url: &str);
}

/// Registry of notification targets, keyed by the `target` field of
/// the comment configuration.
#[derive(Default)]
pub struct Notifier {
    senders: HashMap<String, Box<dyn Sender>>,
}

impl Notifier {
    pub fn new() -> Notifier {
        Notifier::default()
    }

    pub fn register(&mut self, target: &str, sender: Box<dyn Sender>) {
        if self.senders.insert(target.to_string(), sender).is_some() {
            panic!("duplicate notification sender {target}");
        }
    }

    pub fn send(&self, ctx: &Ctx, config: &Config, batch: &MessageBatch) {
        if !config.comment.enable {
            return;
        }
        for target in &config.comment.targets {
            let Some(sender) = self.senders.get(&target.target) else {
                warn!("unregistered notification sender {}; skipping", target.target);
                continue;
            };
            if let Some(pattern) = &target.pattern {
                if !pattern.is_match(&batch.header.pr_title) {
                    continue;
                }
            }
            let selected: Vec<&str> = batch
                .messages
                .iter()
                .filter(|info| target.types.is_empty() || target.types.contains(&info.kind))
                .map(|info| info.message.as_str())
                .collect();
            if selected.is_empty() {
                continue;
            }
            let message = format!("{}{}", sender.prefix(&batch.header), selected.join("\n"));
            sender.send(ctx, &batch.header, &message, &target.names, &target.url);
        }
    }

    pub fn send_error(
        &self,
        ctx: &Ctx,
        config: &Config,
        pr_title: &str,
        pr_number: u32,
        slug: &str,
        message: &str,
    ) {
        self.send(ctx, config, &MessageBatch::error(pr_title, pr_number, slug, message));
    }
}

/// Posts notifications back on the pull request itself.
pub struct ForgeSender {
    forge: Arc<dyn Forge>,
}

impl ForgeSender {
    pub fn new(forge: Arc<dyn Forge>) -> ForgeSender {
        ForgeSender { forge }
    }
}

impl Sender for ForgeSender {
    fn prefix(&self, header: &MessageHeader) -> String {
        format!(
            "Pull Request {} in repo {}: ",
            header.pr_title, header.slug
        )
    }

    fn send(&self, ctx: &Ctx, header: &MessageHeader, message: &str, _names: &[String], _url: &str) {
        if header.pr_number == 0 {
            return;
        }
        match self.forge.capabilities() {
            Ok(caps) if caps.repo.pr_write_comment => {}
            Ok(_) => return,
            Err(err) => {
                warn!("error retrieving forge capabilities: {err:#}");
                return;
            }
        }
        if let Err(err) = self
            .forge
            .write_comment(ctx, &ctx.repo, header.pr_number, message)
        {
            warn!("error sending pull request notification: {err:#}");
        }
    }
}

#[derive(Serialize)]
struct SlackPayload<'a> {
    channel: &'a str,
    text: &'a str,
    username: &'a str,
    icon_url: &'a str,
}

/// Posts notifications to Slack incoming webhooks. A target without
/// its own URL falls back to the administrator default.
pub struct SlackSender {
    client: reqwest::blocking::Client,
    base_url: String,
    default_hook_url: Option<String>,
}

impl SlackSender {
    pub fn new(base_url: &str, default_hook_url: Option<String>) -> SlackSender {
        SlackSender {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.to_string(),
            default_hook_url,
        }
    }
}

impl Sender for SlackSender {
    fn prefix(&self, header: &MessageHeader) -> String {
        format!(
            "<{base}/{slug}/pull/{number}|Pull Request {title}> in <{base}/{slug}|repo {slug}>: ",
            base = self.base_url,
            slug = header.slug,
            number = header.pr_number,
            title = header.pr_title,
        )
    }

    fn send(&self, _ctx: &Ctx, _header: &MessageHeader, message: &str, names: &[String], url: &str) {
        let url = if url.is_empty() {
            match &self.default_hook_url {
                Some(default) => default.as_str(),
                None => {
                    warn!("error sending to Slack: no webhook URL is configured");
                    return;
                }
            }
        } else {
            url
        };
        for name in names {
            let payload = SlackPayload {
                channel: name,
                text: message,
                username: crate::SERVICE_TITLE,
                icon_url: "",
            };
            let result = self
                .client
                .post(url)
                .json(&payload)
                .send()
                .and_then(|resp| resp.error_for_status());
            if let Err(err) = result {
                warn!("error writing notification to {url}: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommentConfig, TargetConfig};
    use crate::test_utils::test_ctx;
    use std::sync::Mutex;

    struct Recorder {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl Sender for Recorder {
        fn prefix(&self, header: &MessageHeader) -> String {
            format!("[{}] ", header.slug)
        }

        fn send(
            &self,
            _ctx: &Ctx,
            _header: &MessageHeader,
            message: &str,
            _names: &[String],
            _url: &str,
        ) {
            self.sent.lock().unwrap().push(message.to_string());
        }
    }

    fn recording_notifier() -> (Notifier, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut notifier = Notifier::new();
        notifier.register("github", Box::new(Recorder { sent: sent.clone() }));
        (notifier, sent)
    }

    fn comment_config(types: Vec<MessageKind>) -> Config {
        let mut config = Config::default();
        config.comment = CommentConfig {
            enable: true,
            targets: vec![TargetConfig {
                target: "github".to_string(),
                pattern: None,
                types,
                names: Vec::new(),
                url: String::new(),
            }],
        };
        config
    }

    #[test]
    fn messages_are_filtered_by_kind() {
        let (notifier, sent) = recording_notifier();
        let config = comment_config(vec![MessageKind::Merge]);
        let mut batch = MessageBatch::new("Add parser", 7, "octo/widgets");
        batch.push(MessageKind::Merge, "merged");
        batch.push(MessageKind::Tag, "Tag v1.0.0 has been added");
        notifier.send(&test_ctx(), &config, &batch);
        let sent = sent.lock().unwrap();
        assert_eq!(sent.as_slice(), ["[octo/widgets] merged"]);
    }

    #[test]
    fn empty_type_list_accepts_everything() {
        let (notifier, sent) = recording_notifier();
        let config = comment_config(Vec::new());
        let mut batch = MessageBatch::new("Add parser", 7, "octo/widgets");
        batch.push(MessageKind::Merge, "merged");
        batch.push(MessageKind::Delete, "Branch feature has been deleted");
        notifier.send(&test_ctx(), &config, &batch);
        let sent = sent.lock().unwrap();
        assert_eq!(
            sent.as_slice(),
            ["[octo/widgets] merged\nBranch feature has been deleted"]
        );
    }

    #[test]
    fn disabled_comments_send_nothing() {
        let (notifier, sent) = recording_notifier();
        let mut config = comment_config(Vec::new());
        config.comment.enable = false;
        let mut batch = MessageBatch::new("Add parser", 7, "octo/widgets");
        batch.push(MessageKind::Merge, "merged");
        notifier.send(&test_ctx(), &config, &batch);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn mismatched_batches_do_not_merge() {
        let mut batch = MessageBatch::new("Add parser", 7, "octo/widgets");
        batch.push(MessageKind::Open, "opened");
        let mut other = MessageBatch::new("Other change", 9, "octo/widgets");
        other.push(MessageKind::Close, "closed");
        batch.merge(other);
        assert_eq!(batch.messages.len(), 1);
    }
}
