//! HTML pages
//!
//! Plain string templates. Everything that came from a request or from the
//! identity provider goes through [`text`] or [`attr`] before it is written.

use axum::extract::{Query, rejection::QueryRejection};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::auth::Identity;

const APP_NAME: &str = "Sessiongate";

/// `error` / `success` messages carried by redirects
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Notice {
    pub error: Option<String>,
    pub success: Option<String>,
    #[serde(rename = "showLogin")]
    pub show_login: Option<String>,
}

impl Notice {
    /// Messages from the query string; an unreadable query shows none
    pub fn from_query(query: Result<Query<Notice>, QueryRejection>) -> Self {
        query.map(|Query(notice)| notice).unwrap_or_default()
    }

    fn show_login(&self) -> bool {
        self.show_login.as_deref() == Some("true")
    }
}

/// State of the new-password form
#[derive(Debug, Clone, Default)]
pub struct ResetPasswordView {
    pub email: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub error: Option<String>,
    /// Fragment mode: the page posts the URL fragment's tokens back
    pub fragment: Option<FragmentResubmission>,
}

/// Where fragment tokens are posted, and the link type assumed when the
/// fragment names none
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentResubmission {
    pub action: &'static str,
    pub default_type: &'static str,
}

fn text(value: &str) -> String {
    html_escape::encode_text(value).into_owned()
}

fn attr(value: &str) -> String {
    html_escape::encode_double_quoted_attribute(value).into_owned()
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} - {APP_NAME}</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 28rem; margin: 3rem auto; padding: 0 1rem; color: #1f2937; }}
form {{ display: flex; flex-direction: column; gap: 0.75rem; }}
input[type=email], input[type=password] {{ padding: 0.5rem; border: 1px solid #d1d5db; border-radius: 0.25rem; }}
button {{ padding: 0.6rem; border: 0; border-radius: 0.25rem; background: #4f46e5; color: #fff; cursor: pointer; }}
.notice {{ padding: 0.75rem; border-radius: 0.25rem; }}
.error {{ background: #fee2e2; color: #991b1b; }}
.success {{ background: #dcfce7; color: #166534; }}
nav a {{ margin-right: 1rem; }}
</style>
</head>
<body>
<nav><a href="/">{APP_NAME}</a></nav>
{body}
</body>
</html>
"#,
        title = text(title),
    )
}

fn notices(notice: &Notice) -> String {
    let mut html = String::new();
    if let Some(error) = notice.error.as_deref().filter(|m| !m.is_empty()) {
        html.push_str(&format!(
            r#"<p class="notice error" role="alert">{}</p>"#,
            text(error)
        ));
    }
    if let Some(success) = notice.success.as_deref().filter(|m| !m.is_empty()) {
        html.push_str(&format!(
            r#"<p class="notice success" role="status">{}</p>"#,
            text(success)
        ));
    }
    html
}

fn hidden(name: &str, value: Option<&str>) -> String {
    match value {
        Some(value) => format!(
            r#"<input type="hidden" name="{name}" value="{}">"#,
            attr(value)
        ),
        None => String::new(),
    }
}

pub fn landing_page(identity: Option<&Identity>, notice: &Notice) -> String {
    let actions = match identity {
        Some(_) => r#"<p><a href="/dashboard">Go to your dashboard</a> · <a href="/auth/logout">Sign out</a></p>"#,
        None => r#"<p><a href="/auth/login">Sign in</a> · <a href="/auth/register">Create an account</a></p>"#,
    };
    layout(
        "Welcome",
        &format!("<h1>Welcome to {APP_NAME}</h1>{}{actions}", notices(notice)),
    )
}

pub fn login_page(notice: &Notice) -> String {
    let body = format!(
        r#"<h1>Sign in</h1>
{notices}
<form method="post" action="/auth/login">
<label>Email <input type="email" name="email" autocomplete="email" required></label>
<label>Password <input type="password" name="password" autocomplete="current-password" required></label>
<label><input type="checkbox" name="remember" value="on"> Remember me for 30 days</label>
<button type="submit">Sign in</button>
</form>
<p><a href="/auth/forgot-password">Forgot your password?</a></p>
<p>No account yet? <a href="/auth/register">Register</a></p>"#,
        notices = notices(notice),
    );
    layout("Sign in", &body)
}

pub fn register_page(notice: &Notice) -> String {
    let login_hint = if notice.show_login() {
        r#"<p><a href="/auth/login">Sign in with your existing account</a></p>"#
    } else {
        ""
    };
    let body = format!(
        r#"<h1>Create an account</h1>
{notices}{login_hint}
<form method="post" action="/auth/register">
<label>Email <input type="email" name="email" autocomplete="email" required></label>
<label>Password <input type="password" name="password" autocomplete="new-password" required></label>
<label>Confirm password <input type="password" name="confirm_password" autocomplete="new-password" required></label>
<button type="submit">Register</button>
</form>
<p>Already registered? <a href="/auth/login">Sign in</a></p>"#,
        notices = notices(notice),
    );
    layout("Register", &body)
}

pub fn forgot_password_page(notice: &Notice) -> String {
    let body = format!(
        r#"<h1>Reset your password</h1>
{notices}
<form method="post" action="/auth/forgot-password">
<label>Email <input type="email" name="email" autocomplete="email" required></label>
<button type="submit">Send reset link</button>
</form>
<p><a href="/auth/login">Back to sign in</a></p>"#,
        notices = notices(notice),
    );
    layout("Forgot password", &body)
}

/// Client-side fallback for tokens delivered in the URL fragment
///
/// Servers never see `#...`, so the page posts the fragment's tokens in an
/// auto-submitted form; they stay out of URLs and request logs. The fragment
/// is dropped from history first, which ends the loop.
fn fragment_script(target: &FragmentResubmission) -> String {
    format!(
        r#"<script>
(function () {{
  var fragment = new URLSearchParams(window.location.hash.replace(/^#/, ""));
  if (!fragment.get("access_token") && !fragment.get("error_description")) {{
    var pending = document.getElementById("link-pending");
    if (pending) {{ pending.hidden = false; }}
    return;
  }}
  history.replaceState(null, "", window.location.pathname);
  if (!fragment.get("type")) {{ fragment.set("type", "{default_type}"); }}
  var form = document.createElement("form");
  form.method = "post";
  form.action = "{action}";
  ["access_token", "refresh_token", "type", "error", "error_description"].forEach(function (key) {{
    var value = fragment.get(key);
    if (!value) {{ return; }}
    var input = document.createElement("input");
    input.type = "hidden";
    input.name = key;
    input.value = value;
    form.appendChild(input);
  }});
  document.body.appendChild(form);
  form.submit();
}})();
</script>"#,
        action = attr(target.action),
        default_type = attr(target.default_type),
    )
}

pub fn reset_password_page(view: &ResetPasswordView) -> String {
    let notice = Notice {
        error: view.error.clone(),
        ..Notice::default()
    };
    let fragment = match &view.fragment {
        Some(target) => format!(
            r#"<p id="link-pending" class="notice error" hidden>This link is invalid or has expired. <a href="/auth/forgot-password">Request a new one</a>.</p>{}"#,
            fragment_script(target)
        ),
        None => String::new(),
    };
    let email = view
        .email
        .as_deref()
        .map(|email| {
            format!(
                r#"<p>Choose a new password for <strong>{}</strong>.</p>"#,
                text(email)
            )
        })
        .unwrap_or_default();

    let body = format!(
        r#"<h1>Choose a new password</h1>
{notices}{fragment}{email}
<form method="post" action="/auth/reset-password">
{email_field}{access_field}{refresh_field}
<label>New password <input type="password" name="password" autocomplete="new-password" required></label>
<label>Confirm new password <input type="password" name="confirm_password" autocomplete="new-password"></label>
<button type="submit">Update password</button>
</form>"#,
        notices = notices(&notice),
        email_field = hidden("email", view.email.as_deref()),
        access_field = hidden("access_token", view.access_token.as_deref()),
        refresh_field = hidden("refresh_token", view.refresh_token.as_deref()),
    );
    layout("Reset password", &body)
}

pub fn dashboard_page(identity: &Identity, notice: &Notice) -> String {
    let body = format!(
        r#"<h1>Dashboard</h1>
{notices}
<dl>
<dt>User ID</dt><dd>{id}</dd>
<dt>Email</dt><dd>{email}</dd>
</dl>
<p><a href="/auth/logout">Sign out</a></p>"#,
        notices = notices(notice),
        id = text(&identity.id),
        email = text(identity.email.as_deref().unwrap_or("-")),
    );
    layout("Dashboard", &body)
}

pub fn not_found_page() -> String {
    layout(
        "Page not found",
        r#"<h1>Page not found</h1><p>The page you are looking for does not exist. <a href="/">Back to the start page</a></p>"#,
    )
}

pub fn error_page(status: StatusCode, message: &str) -> String {
    let title = status.canonical_reason().unwrap_or("Error");
    layout(
        title,
        &format!(
            r#"<h1>{}</h1><p>{}</p><p><a href="/">Back to the start page</a></p>"#,
            text(title),
            text(message)
        ),
    )
}
