//! Route table: every path, its method, auth level and response kind, plus the
//! handlers that turn form input into frontend calls.

use serde_json::json;
use tracing::info;

use crate::backend::{Action, ActionResult, NewPost, Page};
use crate::error::{AppError, AppResult};
use crate::handler;
use crate::identity::{AuthLevel, CsrfGuard, InstanceRef, RequestContext, Settings};

use super::dispatch::{Reply, ResponseKind, Route, SessionPolicy};
use super::response::session_cookie;
use super::AppState;

use AuthLevel::{CsrfRequired, NoAuth, SessionRequired};
use ResponseKind::{Html, Json};

pub fn table() -> Vec<Route> {
    vec![
        Route::get("/", SessionRequired, Html, handler!(root))
            .on_invalid_session(SessionPolicy::Redirect { to: "/signin", clear_cookie: false }),
        Route::get("/nav", SessionRequired, Html, handler!(nav)),
        Route::get("/signin", NoAuth, Html, handler!(signin_page)),
        Route::get("/timeline/{type}", SessionRequired, Html, handler!(timeline)),
        Route::get("/timeline", SessionRequired, Html, handler!(default_timeline)),
        Route::get("/thread/{id}", SessionRequired, Html, handler!(thread)),
        Route::get("/likedby/{id}", SessionRequired, Html, handler!(liked_by)),
        Route::get("/retweetedby/{id}", SessionRequired, Html, handler!(retweeted_by)),
        Route::get("/notifications", SessionRequired, Html, handler!(notifications)),
        Route::get("/user/{id}", SessionRequired, Html, handler!(user)),
        Route::get("/user/{id}/{type}", SessionRequired, Html, handler!(user)),
        Route::get("/usersearch/{id}", SessionRequired, Html, handler!(user_search)),
        Route::get("/about", SessionRequired, Html, handler!(about)),
        Route::get("/emojis", SessionRequired, Html, handler!(emojis)),
        Route::get("/search", SessionRequired, Html, handler!(search)),
        Route::get("/settings", SessionRequired, Html, handler!(settings_page)),
        Route::get("/filters", SessionRequired, Html, handler!(filters)),
        Route::post("/signin", NoAuth, Html, handler!(signin)),
        Route::get("/oauth_callback", SessionRequired, Html, handler!(oauth_callback)),
        Route::post("/post", CsrfRequired, Html, handler!(post)),
        Route::post("/like/{id}", CsrfRequired, Html, handler!(like)),
        Route::post("/unlike/{id}", CsrfRequired, Html, handler!(unlike)),
        Route::post("/retweet/{id}", CsrfRequired, Html, handler!(retweet)),
        Route::post("/unretweet/{id}", CsrfRequired, Html, handler!(unretweet)),
        Route::post("/vote/{id}", CsrfRequired, Html, handler!(vote)),
        Route::post("/follow/{id}", CsrfRequired, Html, handler!(follow)),
        Route::post("/unfollow/{id}", CsrfRequired, Html, handler!(unfollow)),
        Route::post("/accept/{id}", CsrfRequired, Html, handler!(accept)),
        Route::post("/reject/{id}", CsrfRequired, Html, handler!(reject)),
        Route::post("/mute/{id}", CsrfRequired, Html, handler!(mute)),
        Route::post("/unmute/{id}", CsrfRequired, Html, handler!(unmute)),
        Route::post("/block/{id}", CsrfRequired, Html, handler!(block)),
        Route::post("/unblock/{id}", CsrfRequired, Html, handler!(unblock)),
        Route::post("/subscribe/{id}", CsrfRequired, Html, handler!(subscribe)),
        Route::post("/unsubscribe/{id}", CsrfRequired, Html, handler!(unsubscribe)),
        Route::post("/settings", CsrfRequired, Html, handler!(save_settings)),
        Route::post("/muteconv/{id}", CsrfRequired, Html, handler!(mute_conversation)),
        Route::post("/unmuteconv/{id}", CsrfRequired, Html, handler!(unmute_conversation)),
        Route::post("/delete/{id}", CsrfRequired, Html, handler!(delete)),
        Route::post("/notifications/read", CsrfRequired, Html, handler!(read_notifications)),
        Route::post("/bookmark/{id}", CsrfRequired, Html, handler!(bookmark)),
        Route::post("/unbookmark/{id}", CsrfRequired, Html, handler!(unbookmark)),
        Route::post("/filter", CsrfRequired, Html, handler!(filter)),
        Route::post("/unfilter/{id}", CsrfRequired, Html, handler!(unfilter)),
        Route::post("/signout", CsrfRequired, Html, handler!(signout))
            .on_invalid_session(SessionPolicy::Redirect { to: "/", clear_cookie: true }),
        Route::post("/fluoride/like/{id}", CsrfRequired, Json, handler!(fluoride_like)),
        Route::post("/fluoride/unlike/{id}", CsrfRequired, Json, handler!(fluoride_unlike)),
        Route::post("/fluoride/retweet/{id}", CsrfRequired, Json, handler!(fluoride_retweet)),
        Route::post("/fluoride/unretweet/{id}", CsrfRequired, Json, handler!(fluoride_unretweet)),
    ]
}

/// Trimmed domain, `https://` stripped. An explicit `http://` is kept for local instances.
pub fn normalize_instance(raw: &str) -> AppResult<String> {
    let s = raw.trim().trim_end_matches('/');
    let s = s.strip_prefix("https://").unwrap_or(s);
    let host = s.strip_prefix("http://").unwrap_or(s);
    if host.is_empty() || host.contains(|c: char| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '@')) {
        return Err(AppError::user("invalid_instance", format!("not an instance domain: {raw:?}")));
    }
    Ok(s.to_string())
}

/// Only same-site paths are followed; anything else lands on `/`.
fn local_referrer(ctx: &RequestContext) -> &str {
    let r = ctx.referrer();
    if r.starts_with('/') && !r.starts_with("//") && !r.starts_with("/\\") { r } else { "/" }
}

async fn begin_signin(st: &AppState, raw_instance: &str) -> AppResult<Reply> {
    let domain = normalize_instance(raw_instance)?;
    let app = st.accounts.register_app(&domain).await?;
    let session = st
        .sessions
        .create_for_signin(InstanceRef { domain, client_id: app.client_id, client_secret: app.client_secret })
        .await?;
    let url = st.accounts.authorization_url(&session.instance, &CsrfGuard::oauth_state(&session))?;
    info!(target: "session", instance = %session.instance.domain, "signin started");
    let cookie = session_cookie(&session.id, session.expires_at, st.config.secure_cookies);
    Ok(Reply::redirect(url).with_cookie(cookie))
}

async fn render(st: &AppState, ctx: &RequestContext, page: Page) -> AppResult<Reply> {
    Ok(Reply::Page(st.frontend.page(ctx, page).await?))
}

async fn then_referrer(st: &AppState, ctx: &RequestContext, action: Action) -> AppResult<Reply> {
    st.frontend.act(ctx, action).await?;
    Ok(Reply::redirect(local_referrer(ctx)))
}

/// Back to the referrer, anchored on the status (or on the boost it was shown through).
async fn then_status(st: &AppState, ctx: &RequestContext, action: Action) -> AppResult<Reply> {
    st.frontend.act(ctx, action).await?;
    let rid = ctx.params.form_value("retweeted_by_id");
    let anchor = if rid.is_empty() { ctx.path_param("id") } else { rid };
    Ok(Reply::redirect(format!("{}#status-{}", local_referrer(ctx), anchor)))
}

async fn then_count(st: &AppState, ctx: &RequestContext, action: Action) -> AppResult<Reply> {
    match st.frontend.act(ctx, action).await? {
        ActionResult::Count(n) => Ok(Reply::Data(json!(n))),
        other => Err(unexpected(&other)),
    }
}

fn unexpected(got: &ActionResult) -> AppError {
    AppError::internal("unexpected_result", format!("frontend answered {got:?}"))
}

fn id(ctx: &RequestContext) -> String { ctx.path_param("id").to_string() }

async fn root(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    ctx.require_authenticated()?;
    render(st, ctx, Page::Root).await
}

async fn nav(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { render(st, ctx, Page::Nav).await }

async fn signin_page(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    match st.config.single_instance.as_deref() {
        Some(instance) => begin_signin(st, instance).await,
        None => render(st, ctx, Page::Signin).await,
    }
}

async fn timeline(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    let q = &ctx.params;
    let page = Page::Timeline {
        kind: ctx.path_param("type").to_string(),
        instance: q.query_value("instance").to_string(),
        max_id: q.query_value("max_id").to_string(),
        min_id: q.query_value("min_id").to_string(),
    };
    render(st, ctx, page).await
}

async fn default_timeline(_: &AppState, _: &RequestContext) -> AppResult<Reply> { Ok(Reply::redirect("/timeline/home")) }

async fn thread(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    let reply = ctx.params.query_value("reply").len() > 1;
    render(st, ctx, Page::Thread { id: id(ctx), reply }).await
}

async fn liked_by(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { render(st, ctx, Page::LikedBy { id: id(ctx) }).await }

async fn retweeted_by(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    render(st, ctx, Page::RetweetedBy { id: id(ctx) }).await
}

async fn notifications(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    let q = &ctx.params;
    let page = Page::Notifications { max_id: q.query_value("max_id").to_string(), min_id: q.query_value("min_id").to_string() };
    render(st, ctx, page).await
}

async fn user(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    let q = &ctx.params;
    let page = Page::User {
        id: id(ctx),
        kind: ctx.path_param("type").to_string(),
        max_id: q.query_value("max_id").to_string(),
        min_id: q.query_value("min_id").to_string(),
    };
    render(st, ctx, page).await
}

async fn user_search(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    let q = &ctx.params;
    let page = Page::UserSearch { id: id(ctx), q: q.query_value("q").to_string(), offset: q.query_int("offset") };
    render(st, ctx, page).await
}

async fn about(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { render(st, ctx, Page::About).await }

async fn emojis(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { render(st, ctx, Page::Emojis).await }

async fn search(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    let q = &ctx.params;
    let page = Page::Search {
        q: q.query_value("q").to_string(),
        kind: q.query_value("type").to_string(),
        offset: q.query_int("offset"),
    };
    render(st, ctx, page).await
}

async fn settings_page(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { render(st, ctx, Page::Settings).await }

async fn filters(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { render(st, ctx, Page::Filters).await }

async fn signin(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    begin_signin(st, ctx.params.form_value("instance")).await
}

async fn oauth_callback(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    let session = ctx.session()?;
    let q = &ctx.params;
    if q.has_query("error") {
        let reason = match q.query_value("error_description") {
            "" => q.query_value("error"),
            d => d,
        };
        return Err(AppError::backend("authorization_denied", reason));
    }
    let state = q.has_query("state").then(|| q.query_value("state"));
    if (session.state_bound || state.is_some()) && !CsrfGuard::validate_oauth_state(session, state) {
        return Err(AppError::invalid_csrf());
    }
    let code = q.query_value("code");
    if code.is_empty() {
        return Err(AppError::user("missing_code", "authorization code missing"));
    }
    let token = st.accounts.exchange_code(&session.instance, code).await?;
    let session = st.sessions.promote(&session.id, token).await?;
    info!(target: "session", instance = %session.instance.domain, "signin completed");
    let cookie = session_cookie(&session.id, session.expires_at, st.config.secure_cookies);
    Ok(Reply::redirect("/").with_cookie(cookie))
}

async fn post(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    let p = &ctx.params;
    let reply_to_id = p.form_value("reply_to_id").to_string();
    let new = NewPost {
        content: p.form_value("content").to_string(),
        reply_to_id: reply_to_id.clone(),
        format: p.form_value("format").to_string(),
        visibility: p.form_value("visibility").to_string(),
        sensitive: p.form_bool("is_nsfw"),
        attachments: p.attachments.clone(),
    };
    let created = match st.frontend.act(ctx, Action::Post(new)).await? {
        ActionResult::Created(id) => id,
        other => return Err(unexpected(&other)),
    };
    let location = if reply_to_id.is_empty() {
        local_referrer(ctx).to_string()
    } else {
        format!("/thread/{reply_to_id}#status-{created}")
    };
    Ok(Reply::redirect(location))
}

async fn like(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { then_status(st, ctx, Action::Like(id(ctx))).await }

async fn unlike(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { then_status(st, ctx, Action::Unlike(id(ctx))).await }

async fn retweet(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { then_status(st, ctx, Action::Retweet(id(ctx))).await }

async fn unretweet(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    then_status(st, ctx, Action::Unretweet(id(ctx))).await
}

async fn vote(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    let choices = ctx.params.form_values("choices");
    st.frontend.act(ctx, Action::Vote { poll_id: id(ctx), choices }).await?;
    let status_id = ctx.params.form_value("status_id");
    Ok(Reply::redirect(format!("{}#status-{}", local_referrer(ctx), status_id)))
}

async fn follow(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    let reblogs = ctx.params.query_tristate("reblogs");
    then_referrer(st, ctx, Action::Follow { id: id(ctx), reblogs }).await
}

async fn unfollow(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { then_referrer(st, ctx, Action::Unfollow(id(ctx))).await }

async fn accept(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { then_referrer(st, ctx, Action::Accept(id(ctx))).await }

async fn reject(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { then_referrer(st, ctx, Action::Reject(id(ctx))).await }

async fn mute(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { then_referrer(st, ctx, Action::Mute(id(ctx))).await }

async fn unmute(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { then_referrer(st, ctx, Action::Unmute(id(ctx))).await }

async fn block(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { then_referrer(st, ctx, Action::Block(id(ctx))).await }

async fn unblock(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { then_referrer(st, ctx, Action::Unblock(id(ctx))).await }

async fn subscribe(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    then_referrer(st, ctx, Action::Subscribe(id(ctx))).await
}

async fn unsubscribe(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    then_referrer(st, ctx, Action::Unsubscribe(id(ctx))).await
}

async fn save_settings(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    let p = &ctx.params;
    let settings = Settings {
        default_visibility: p.form_value("visibility").to_string(),
        default_format: p.form_value("format").to_string(),
        copy_scope: p.form_bool("copy_scope"),
        thread_in_new_tab: p.form_bool("thread_in_new_tab"),
        hide_attachments: p.form_bool("hide_attachments"),
        mask_nsfw: p.form_bool("mask_nsfw"),
        notification_interval: p.form_int("notification_interval"),
        fluoride_mode: p.form_bool("fluoride_mode"),
        dark_mode: p.form_bool("dark_mode"),
        anti_dopamine_mode: p.form_bool("anti_dopamine_mode"),
        css: p.form_value("css").to_string(),
    };
    st.sessions.save_settings(&ctx.session()?.id, settings).await?;
    Ok(Reply::redirect("/"))
}

async fn mute_conversation(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    then_referrer(st, ctx, Action::MuteConversation(id(ctx))).await
}

async fn unmute_conversation(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    then_referrer(st, ctx, Action::UnmuteConversation(id(ctx))).await
}

async fn delete(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { then_referrer(st, ctx, Action::Delete(id(ctx))).await }

async fn read_notifications(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    let max_id = ctx.params.query_value("max_id").to_string();
    then_referrer(st, ctx, Action::ReadNotifications { max_id }).await
}

async fn bookmark(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { then_status(st, ctx, Action::Bookmark(id(ctx))).await }

async fn unbookmark(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    then_status(st, ctx, Action::Unbookmark(id(ctx))).await
}

async fn filter(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    let p = &ctx.params;
    let action = Action::Filter { phrase: p.form_value("phrase").to_string(), whole_word: p.form_bool("whole_word") };
    then_referrer(st, ctx, action).await
}

async fn unfilter(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { then_referrer(st, ctx, Action::Unfilter(id(ctx))).await }

async fn signout(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    st.sessions.destroy(&ctx.session()?.id).await?;
    Ok(Reply::redirect("/").with_cookie(super::response::cleared_session_cookie(st.config.secure_cookies)))
}

async fn fluoride_like(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> { then_count(st, ctx, Action::Like(id(ctx))).await }

async fn fluoride_unlike(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    then_count(st, ctx, Action::Unlike(id(ctx))).await
}

async fn fluoride_retweet(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    then_count(st, ctx, Action::Retweet(id(ctx))).await
}

async fn fluoride_unretweet(st: &AppState, ctx: &RequestContext) -> AppResult<Reply> {
    then_count(st, ctx, Action::Unretweet(id(ctx))).await
}
