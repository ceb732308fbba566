//! HTML rendering seam. Production deployments are expected to plug their own
//! templates in through `Renderer`; `BasicRenderer` is a small autoescaped default
//! good enough to drive the whole sign-in flow and inspect remote data.

use minijinja::{context, Environment};
use serde::Serialize;

use crate::error::AppError;

#[derive(Debug, thiserror::Error)]
#[error("template error: {0}")]
pub struct RenderError(#[from] minijinja::Error);

impl From<RenderError> for AppError {
    fn from(e: RenderError) -> Self { AppError::internal("render", e.to_string()) }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SigninView {
    /// Prefilled instance when a previous attempt failed validation.
    pub instance: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataView {
    pub title: String,
    pub data: serde_json::Value,
    pub csrf_token: Option<String>,
    pub referrer: String,
    pub dark_mode: bool,
    pub css: String,
}

pub trait Renderer: Send + Sync {
    /// `retry` tells the user whether resubmitting is safe.
    fn error_page(&self, message: &str, retry: bool) -> Result<String, RenderError>;
    fn signin_page(&self, view: &SigninView) -> Result<String, RenderError>;
    fn data_page(&self, view: &DataView) -> Result<String, RenderError>;
}

const LAYOUT: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{% block title %}{% endblock %} - bloat</title>
<link rel="stylesheet" href="/static/style.css">
{% block head %}{% endblock %}
</head>
<body{% if dark_mode %} class="dark"{% endif %}>
{% block body %}{% endblock %}
</body>
</html>
"#;

const ERROR_PAGE: &str = r#"{% extends "layout.html" %}
{% block title %}Error{% endblock %}
{% block body %}
<h1>Error</h1>
<p class="error-text">{{ message }}</p>
<p>{% if retry %}<a href="">Retry</a> {% endif %}<a href="/signin">Sign in</a> <a href="/">Home</a></p>
{% endblock %}
"#;

const SIGNIN_PAGE: &str = r#"{% extends "layout.html" %}
{% block title %}Sign in{% endblock %}
{% block body %}
<h1>Sign in</h1>
<form class="signin" action="/signin" method="post">
<label for="instance">Enter the domain of your instance to continue</label>
<input id="instance" type="text" name="instance" placeholder="example.social" value="{{ instance }}" required>
<button type="submit">Sign in</button>
</form>
{% endblock %}
"#;

const DATA_PAGE: &str = r#"{% extends "layout.html" %}
{% block title %}{{ title }}{% endblock %}
{% block head %}{% if css %}<style>{{ css }}</style>{% endif %}{% endblock %}
{% block body %}
<nav>
<a href="/timeline/home">Home</a> <a href="/notifications">Notifications</a> <a href="/settings">Settings</a>
{% if csrf_token %}
<form class="signout" action="/signout" method="post">
<input type="hidden" name="csrf_token" value="{{ csrf_token }}">
<input type="hidden" name="referrer" value="{{ referrer }}">
<button type="submit">Sign out</button>
</form>
{% endif %}
</nav>
<h1>{{ title }}</h1>
<pre class="data">{{ data | tojson(indent=2) }}</pre>
{% endblock %}
"#;

pub struct BasicRenderer {
    env: Environment<'static>,
}

impl BasicRenderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut env = Environment::new();
        env.add_template("layout.html", LAYOUT)?;
        env.add_template("error.html", ERROR_PAGE)?;
        env.add_template("signin.html", SIGNIN_PAGE)?;
        env.add_template("data.html", DATA_PAGE)?;
        Ok(Self { env })
    }
}

impl Renderer for BasicRenderer {
    fn error_page(&self, message: &str, retry: bool) -> Result<String, RenderError> {
        Ok(self.env.get_template("error.html")?.render(context! { message, retry })?)
    }

    fn signin_page(&self, view: &SigninView) -> Result<String, RenderError> {
        Ok(self.env.get_template("signin.html")?.render(view)?)
    }

    fn data_page(&self, view: &DataView) -> Result<String, RenderError> {
        Ok(self.env.get_template("data.html")?.render(view)?)
    }
}
