//! Mastodon-compatible REST client implementing both collaborator traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use super::{AccountBackend, Action, ActionResult, AppRegistration, Frontend, NewPost, Page};
use crate::config::ClientSettings;
use crate::error::{AppError, AppResult};
use crate::identity::{InstanceRef, RequestContext};
use crate::render::{DataView, Renderer, SigninView};

const PAGE_LIMIT: &str = "20";

/// `https://<domain>` unless the domain already names a scheme.
pub fn base_url(domain: &str) -> String {
    if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.trim_end_matches('/').to_string()
    } else {
        format!("https://{domain}")
    }
}

fn endpoint(base: &str, segments: &[&str]) -> AppResult<Url> {
    let mut url = Url::parse(base).map_err(|e| AppError::user("invalid_instance", format!("{base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| AppError::user("invalid_instance", base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Decode a remote reply, turning non-2xx into a `Backend` error carrying the remote message.
async fn decode(resp: reqwest::Response) -> AppResult<Value> {
    let status = resp.status();
    if status.is_success() {
        let body = resp.bytes().await?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_slice(&body).map_err(|e| AppError::backend("remote_decode", e.to_string()));
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| format!("remote returned {status}"));
    warn!(target: "backend", %status, %message, "remote rejected request");
    Err(AppError::backend("remote_rejected", message))
}

fn str_field(v: &Value, name: &str) -> AppResult<String> {
    v.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::backend("remote_decode", format!("response has no {name}")))
}

fn count(v: &Value, name: &str) -> i64 { v.get(name).and_then(Value::as_i64).unwrap_or(0) }

fn paging(max_id: &str, min_id: &str) -> Vec<(&'static str, String)> {
    let mut q = vec![("limit", PAGE_LIMIT.to_string())];
    if !max_id.is_empty() { q.push(("max_id", max_id.to_string())); }
    if !min_id.is_empty() { q.push(("min_id", min_id.to_string())); }
    q
}

pub struct Mastodon {
    http: reqwest::Client,
    client: ClientSettings,
    renderer: Arc<dyn Renderer>,
}

impl Mastodon {
    pub fn new(client: ClientSettings, renderer: Arc<dyn Renderer>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(format!("{}/{}", client.name, env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, client, renderer })
    }

    fn api<'a>(&'a self, ctx: &'a RequestContext) -> AppResult<Api<'a>> {
        let session = ctx.require_authenticated()?;
        let token = session.access_token().ok_or_else(AppError::invalid_session)?;
        Ok(Api { http: &self.http, base: base_url(&session.instance.domain), token })
    }

    fn view(&self, ctx: &RequestContext, title: &str, data: Value) -> AppResult<String> {
        let settings = ctx.session.as_ref().map(|s| s.settings.clone()).unwrap_or_default();
        let view = DataView {
            title: title.to_string(),
            data,
            csrf_token: ctx.csrf_token(),
            referrer: ctx.request_uri.clone(),
            dark_mode: settings.dark_mode,
            css: settings.css,
        };
        Ok(self.renderer.data_page(&view)?)
    }

    async fn public_timeline(&self, domain: &str, max_id: &str, min_id: &str) -> AppResult<Value> {
        if domain.is_empty() {
            return Err(AppError::user("invalid_instance", "no instance given"));
        }
        let url = endpoint(&base_url(domain), &["api", "v1", "timelines", "public"])?;
        let mut query = paging(max_id, min_id);
        query.push(("local", "true".into()));
        decode(self.http.get(url).query(&query).send().await?).await
    }
}

/// Authenticated calls on behalf of one session.
struct Api<'a> {
    http: &'a reqwest::Client,
    base: String,
    token: &'a str,
}

impl Api<'_> {
    async fn get(&self, segments: &[&str], query: &[(&str, String)]) -> AppResult<Value> {
        let url = endpoint(&self.base, segments)?;
        debug!(target: "backend", path = url.path(), "GET");
        decode(self.http.get(url).bearer_auth(self.token).query(query).send().await?).await
    }

    async fn post(&self, segments: &[&str], form: &[(&str, String)]) -> AppResult<Value> {
        let url = endpoint(&self.base, segments)?;
        debug!(target: "backend", path = url.path(), "POST");
        decode(self.http.post(url).bearer_auth(self.token).form(form).send().await?).await
    }

    async fn delete(&self, segments: &[&str]) -> AppResult<Value> {
        let url = endpoint(&self.base, segments)?;
        debug!(target: "backend", path = url.path(), "DELETE");
        decode(self.http.delete(url).bearer_auth(self.token).send().await?).await
    }

    async fn status_op(&self, id: &str, op: &str) -> AppResult<Value> {
        self.post(&["api", "v1", "statuses", id, op], &[]).await
    }

    async fn account_op(&self, id: &str, op: &str, form: &[(&str, String)]) -> AppResult<Value> {
        self.post(&["api", "v1", "accounts", id, op], form).await
    }

    async fn upload(&self, part: Part) -> AppResult<String> {
        let url = endpoint(&self.base, &["api", "v1", "media"])?;
        let form = Form::new().part("file", part);
        let v = decode(self.http.post(url).bearer_auth(self.token).multipart(form).send().await?).await?;
        str_field(&v, "id")
    }

    async fn post_status(&self, post: NewPost) -> AppResult<String> {
        let mut form: Vec<(&str, String)> = vec![("status", post.content)];
        if !post.reply_to_id.is_empty() { form.push(("in_reply_to_id", post.reply_to_id)); }
        if !post.format.is_empty() { form.push(("content_type", post.format)); }
        if !post.visibility.is_empty() { form.push(("visibility", post.visibility)); }
        form.push(("sensitive", post.sensitive.to_string()));
        for a in post.attachments {
            let mut part = Part::bytes(a.data.to_vec()).file_name(a.file_name);
            if let Some(ct) = a.content_type {
                part = part.mime_str(&ct).map_err(|e| AppError::user("invalid_attachment", e.to_string()))?;
            }
            form.push(("media_ids[]", self.upload(part).await?));
        }
        let v = self.post(&["api", "v1", "statuses"], &form).await?;
        str_field(&v, "id")
    }
}

#[async_trait]
impl AccountBackend for Mastodon {
    async fn register_app(&self, domain: &str) -> AppResult<AppRegistration> {
        let url = endpoint(&base_url(domain), &["api", "v1", "apps"])?;
        let form = [
            ("client_name", self.client.name.clone()),
            ("redirect_uris", self.client.redirect_uri()),
            ("scopes", self.client.scope.clone()),
            ("website", self.client.website.clone()),
        ];
        let v = decode(self.http.post(url).form(&form).send().await?).await?;
        Ok(AppRegistration { client_id: str_field(&v, "client_id")?, client_secret: str_field(&v, "client_secret")? })
    }

    fn authorization_url(&self, instance: &InstanceRef, state: &str) -> AppResult<String> {
        let mut url = endpoint(&base_url(&instance.domain), &["oauth", "authorize"])?;
        url.query_pairs_mut()
            .append_pair("client_id", &instance.client_id)
            .append_pair("redirect_uri", &self.client.redirect_uri())
            .append_pair("response_type", "code")
            .append_pair("scope", &self.client.scope)
            .append_pair("state", state);
        Ok(url.into())
    }

    async fn exchange_code(&self, instance: &InstanceRef, code: &str) -> AppResult<String> {
        let url = endpoint(&base_url(&instance.domain), &["oauth", "token"])?;
        let form = [
            ("grant_type", "authorization_code".to_string()),
            ("client_id", instance.client_id.clone()),
            ("client_secret", instance.client_secret.clone()),
            ("redirect_uri", self.client.redirect_uri()),
            ("code", code.to_string()),
            ("scope", self.client.scope.clone()),
        ];
        let v = decode(self.http.post(url).form(&form).send().await?).await?;
        str_field(&v, "access_token")
    }
}

impl Mastodon {
    async fn fetch(&self, api: &Api<'_>, ctx: &RequestContext, page: Page) -> AppResult<(&'static str, Value)> {
        let fetched = match page {
            Page::Signin => return Err(AppError::internal("page", "sign-in page has no remote data")),
            Page::Root => ("Home", api.get(&["api", "v1", "accounts", "verify_credentials"], &[]).await?),
            Page::Nav => ("Navigation", api.get(&["api", "v1", "accounts", "verify_credentials"], &[]).await?),
            Page::Timeline { kind, instance, max_id, min_id } => {
                let q = paging(&max_id, &min_id);
                let data = match kind.as_str() {
                    "home" => api.get(&["api", "v1", "timelines", "home"], &q).await?,
                    "direct" => api.get(&["api", "v1", "conversations"], &q).await?,
                    "local" => {
                        let mut q = q;
                        q.push(("local", "true".into()));
                        api.get(&["api", "v1", "timelines", "public"], &q).await?
                    }
                    "twkn" => api.get(&["api", "v1", "timelines", "public"], &q).await?,
                    "remote" => self.public_timeline(&instance, &max_id, &min_id).await?,
                    other => return Err(AppError::user("invalid_timeline", format!("unknown timeline {other:?}"))),
                };
                ("Timeline", data)
            }
            Page::Thread { id, reply } => {
                let status = api.get(&["api", "v1", "statuses", id.as_str()], &[]).await?;
                let context = api.get(&["api", "v1", "statuses", id.as_str(), "context"], &[]).await?;
                ("Thread", json!({ "status": status, "context": context, "reply": reply }))
            }
            Page::LikedBy { id } => ("Liked by", api.get(&["api", "v1", "statuses", id.as_str(), "favourited_by"], &[]).await?),
            Page::RetweetedBy { id } => ("Retweeted by", api.get(&["api", "v1", "statuses", id.as_str(), "reblogged_by"], &[]).await?),
            Page::Notifications { max_id, min_id } => {
                ("Notifications", api.get(&["api", "v1", "notifications"], &paging(&max_id, &min_id)).await?)
            }
            Page::User { id, kind, max_id, min_id } => {
                let q = paging(&max_id, &min_id);
                let account = api.get(&["api", "v1", "accounts", id.as_str()], &[]).await?;
                let items = match kind.as_str() {
                    "" | "statuses" => api.get(&["api", "v1", "accounts", id.as_str(), "statuses"], &q).await?,
                    "media" => {
                        let mut q = q;
                        q.push(("only_media", "true".into()));
                        api.get(&["api", "v1", "accounts", id.as_str(), "statuses"], &q).await?
                    }
                    "following" => api.get(&["api", "v1", "accounts", id.as_str(), "following"], &q).await?,
                    "followers" => api.get(&["api", "v1", "accounts", id.as_str(), "followers"], &q).await?,
                    "bookmarks" => api.get(&["api", "v1", "bookmarks"], &q).await?,
                    "likes" => api.get(&["api", "v1", "favourites"], &q).await?,
                    "mutes" => api.get(&["api", "v1", "mutes"], &q).await?,
                    "blocks" => api.get(&["api", "v1", "blocks"], &q).await?,
                    "requests" => api.get(&["api", "v1", "follow_requests"], &q).await?,
                    other => return Err(AppError::user("invalid_user_page", format!("unknown user page {other:?}"))),
                };
                ("User", json!({ "account": account, "items": items }))
            }
            Page::UserSearch { id, q, offset } => {
                let query = [
                    ("q", q),
                    ("type", "statuses".to_string()),
                    ("account_id", id),
                    ("offset", offset.to_string()),
                    ("limit", PAGE_LIMIT.to_string()),
                ];
                ("Search", api.get(&["api", "v2", "search"], &query).await?)
            }
            Page::About => ("About", api.get(&["api", "v1", "instance"], &[]).await?),
            Page::Emojis => ("Emojis", api.get(&["api", "v1", "custom_emojis"], &[]).await?),
            Page::Search { q, kind, offset } => {
                let data = if q.is_empty() {
                    Value::Null
                } else {
                    let mut query = vec![("q", q), ("offset", offset.to_string()), ("limit", PAGE_LIMIT.to_string())];
                    if !kind.is_empty() { query.push(("type", kind)); }
                    api.get(&["api", "v2", "search"], &query).await?
                };
                ("Search", data)
            }
            Page::Settings => {
                let settings = &ctx.require_authenticated()?.settings;
                ("Settings", serde_json::to_value(settings).map_err(|e| AppError::internal("encode", e.to_string()))?)
            }
            Page::Filters => ("Filters", api.get(&["api", "v1", "filters"], &[]).await?),
        };
        Ok(fetched)
    }
}

#[async_trait]
impl Frontend for Mastodon {
    async fn page(&self, ctx: &RequestContext, page: Page) -> AppResult<String> {
        if page == Page::Signin {
            return Ok(self.renderer.signin_page(&SigninView::default())?);
        }
        let api = self.api(ctx)?;
        let (title, data) = self.fetch(&api, ctx, page).await?;
        self.view(ctx, title, data)
    }

    async fn act(&self, ctx: &RequestContext, action: Action) -> AppResult<ActionResult> {
        let api = self.api(ctx)?;
        let result = match action {
            Action::Post(post) => ActionResult::Created(api.post_status(post).await?),
            Action::Like(id) => ActionResult::Count(count(&api.status_op(&id, "favourite").await?, "favourites_count")),
            Action::Unlike(id) => ActionResult::Count(count(&api.status_op(&id, "unfavourite").await?, "favourites_count")),
            Action::Retweet(id) => {
                // the reply is the new reblog wrapper; the counter lives on the original
                let v = api.status_op(&id, "reblog").await?;
                let n = v.get("reblog").map(|orig| count(orig, "reblogs_count")).unwrap_or_else(|| count(&v, "reblogs_count"));
                ActionResult::Count(n)
            }
            Action::Unretweet(id) => ActionResult::Count(count(&api.status_op(&id, "unreblog").await?, "reblogs_count")),
            Action::Vote { poll_id, choices } => {
                let form: Vec<(&str, String)> = choices.into_iter().map(|c| ("choices[]", c)).collect();
                api.post(&["api", "v1", "polls", poll_id.as_str(), "votes"], &form).await?;
                ActionResult::Done
            }
            Action::Follow { id, reblogs } => {
                let form: Vec<(&str, String)> = reblogs.as_option().map(|r| ("reblogs", r.to_string())).into_iter().collect();
                api.account_op(&id, "follow", &form).await?;
                ActionResult::Done
            }
            Action::Unfollow(id) => { api.account_op(&id, "unfollow", &[]).await?; ActionResult::Done }
            Action::Accept(id) => { api.post(&["api", "v1", "follow_requests", id.as_str(), "authorize"], &[]).await?; ActionResult::Done }
            Action::Reject(id) => { api.post(&["api", "v1", "follow_requests", id.as_str(), "reject"], &[]).await?; ActionResult::Done }
            Action::Mute(id) => { api.account_op(&id, "mute", &[]).await?; ActionResult::Done }
            Action::Unmute(id) => { api.account_op(&id, "unmute", &[]).await?; ActionResult::Done }
            Action::Block(id) => { api.account_op(&id, "block", &[]).await?; ActionResult::Done }
            Action::Unblock(id) => { api.account_op(&id, "unblock", &[]).await?; ActionResult::Done }
            Action::Subscribe(id) => { api.account_op(&id, "follow", &[("notify", "true".into())]).await?; ActionResult::Done }
            Action::Unsubscribe(id) => { api.account_op(&id, "follow", &[("notify", "false".into())]).await?; ActionResult::Done }
            Action::MuteConversation(id) => { api.status_op(&id, "mute").await?; ActionResult::Done }
            Action::UnmuteConversation(id) => { api.status_op(&id, "unmute").await?; ActionResult::Done }
            Action::Delete(id) => { api.delete(&["api", "v1", "statuses", id.as_str()]).await?; ActionResult::Done }
            Action::ReadNotifications { max_id } => {
                api.post(&["api", "v1", "markers"], &[("notifications[last_read_id]", max_id)]).await?;
                ActionResult::Done
            }
            Action::Bookmark(id) => { api.status_op(&id, "bookmark").await?; ActionResult::Done }
            Action::Unbookmark(id) => { api.status_op(&id, "unbookmark").await?; ActionResult::Done }
            Action::Filter { phrase, whole_word } => {
                let mut form: Vec<(&str, String)> = vec![("phrase", phrase), ("whole_word", whole_word.to_string())];
                form.extend(["home", "notifications", "public", "thread"].map(|c| ("context[]", c.to_string())));
                api.post(&["api", "v1", "filters"], &form).await?;
                ActionResult::Done
            }
            Action::Unfilter(id) => { api.delete(&["api", "v1", "filters", id.as_str()]).await?; ActionResult::Done }
        };
        Ok(result)
    }
}
