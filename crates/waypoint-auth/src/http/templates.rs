//! Server-rendered pages for the authorization endpoint.

const STYLES: &str = r#"
:root {
    --primary: #2563eb;
    --danger: #dc2626;
    --bg: #f8fafc;
    --card: #ffffff;
    --border: #e2e8f0;
    --text: #0f172a;
    --text-secondary: #64748b;
}
* { box-sizing: border-box; margin: 0; padding: 0; }
body {
    font-family: system-ui, -apple-system, sans-serif;
    background: var(--bg);
    color: var(--text);
    min-height: 100vh;
    display: flex;
    align-items: center;
    justify-content: center;
}
.container { width: 100%; max-width: 420px; padding: 1.5rem; }
.card {
    background: var(--card);
    border: 1px solid var(--border);
    border-radius: 12px;
    padding: 2rem;
}
.card-title { font-size: 1.25rem; font-weight: 600; margin-bottom: 1.25rem; }
.form-group { margin-bottom: 1rem; }
.form-label { display: block; font-size: 0.875rem; margin-bottom: 0.375rem; }
.form-input {
    width: 100%;
    padding: 0.625rem 0.75rem;
    border: 1px solid var(--border);
    border-radius: 8px;
    font-size: 0.9375rem;
}
.btn {
    width: 100%;
    padding: 0.625rem;
    border: none;
    border-radius: 8px;
    font-size: 0.9375rem;
    font-weight: 500;
    cursor: pointer;
}
.btn-primary { background: var(--primary); color: #fff; }
.btn-danger { background: #fff; color: var(--danger); border: 1px solid var(--danger); }
.btn-group { display: flex; gap: 0.75rem; }
.alert-error {
    background: #fef2f2;
    color: var(--danger);
    border-radius: 8px;
    padding: 0.75rem;
    margin-bottom: 1rem;
    font-size: 0.875rem;
}
.client-redirect { color: var(--text-secondary); font-size: 0.8125rem; margin-bottom: 1rem; }
.scope-list { list-style: none; margin-bottom: 1.25rem; }
.scope-item { padding: 0.5rem 0; border-bottom: 1px solid var(--border); }
.scope-name { font-weight: 500; font-size: 0.875rem; }
.scope-description { color: var(--text-secondary); font-size: 0.8125rem; }
.error-code { color: var(--text-secondary); font-family: monospace; margin-top: 1rem; }
"#;

fn html_page(title: &str, content: &str) -> String {
    let mut html = String::with_capacity(content.len() + STYLES.len() + 512);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("    <meta charset=\"UTF-8\">\n");
    html.push_str(
        "    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
    );
    html.push_str("    <title>");
    html.push_str(&html_escape(title));
    html.push_str(" - Waypoint</title>\n    <style>");
    html.push_str(STYLES);
    html.push_str("</style>\n</head>\n<body>\n    <div class=\"container\">\n");
    html.push_str(content);
    html.push_str("\n    </div>\n</body>\n</html>");
    html
}

/// Renders the login form for a pending authorization.
pub fn render_login_form(client_name: &str, pending_id: &str, error: Option<&str>) -> String {
    let mut content = String::with_capacity(2048);

    content.push_str("<div class=\"card\">\n<div class=\"card-title\">Sign in to ");
    content.push_str(&html_escape(client_name));
    content.push_str("</div>\n\n");

    if let Some(e) = error {
        content.push_str("<div class=\"alert-error\">");
        content.push_str(&html_escape(e));
        content.push_str("</div>\n\n");
    }

    content.push_str("<form method=\"POST\">\n");
    content.push_str("<input type=\"hidden\" name=\"action\" value=\"login\">\n");
    content.push_str("<input type=\"hidden\" name=\"pending_id\" value=\"");
    content.push_str(&html_escape(pending_id));
    content.push_str("\">\n\n");

    content.push_str("<div class=\"form-group\">\n");
    content.push_str("<label class=\"form-label\" for=\"username\">Username</label>\n");
    content.push_str(
        "<input type=\"text\" id=\"username\" name=\"username\" class=\"form-input\" required autocomplete=\"username\">\n",
    );
    content.push_str("</div>\n\n");

    content.push_str("<div class=\"form-group\">\n");
    content.push_str("<label class=\"form-label\" for=\"password\">Password</label>\n");
    content.push_str(
        "<input type=\"password\" id=\"password\" name=\"password\" class=\"form-input\" required autocomplete=\"current-password\">\n",
    );
    content.push_str("</div>\n\n");

    content.push_str("<button type=\"submit\" class=\"btn btn-primary\">Sign in</button>\n");
    content.push_str("</form>\n</div>");

    html_page("Sign In", &content)
}

/// Human-readable description of a scope for the consent form.
pub fn scope_description(scope: &str) -> &'static str {
    match scope {
        "openid" => "Confirm your identity",
        "profile" => "Read your name and username",
        "email" => "Read your email address",
        "backend.read" => "Read customers and bookings",
        "backend.write" => "Create, change and cancel bookings",
        _ => "Access granted by this permission",
    }
}

/// Renders the consent form.
pub fn render_consent_form(
    client_name: &str,
    redirect_uri: &str,
    scopes: &[&str],
    pending_id: &str,
) -> String {
    let mut content = String::with_capacity(2048);

    content.push_str("<div class=\"card\">\n<div class=\"card-title\">Authorize ");
    content.push_str(&html_escape(client_name));
    content.push_str("</div>\n");
    content.push_str("<div class=\"client-redirect\">");
    content.push_str(&html_escape(redirect_uri));
    content.push_str("</div>\n\n");

    content.push_str("<ul class=\"scope-list\">\n");
    for scope in scopes {
        content.push_str("<li class=\"scope-item\">\n<div class=\"scope-name\">");
        content.push_str(&html_escape(scope));
        content.push_str("</div>\n<div class=\"scope-description\">");
        content.push_str(scope_description(scope));
        content.push_str("</div>\n</li>\n");
    }
    content.push_str("</ul>\n\n");

    content.push_str("<form method=\"POST\">\n");
    content.push_str("<input type=\"hidden\" name=\"pending_id\" value=\"");
    content.push_str(&html_escape(pending_id));
    content.push_str("\">\n");
    content.push_str("<div class=\"btn-group\">\n");
    content.push_str(
        "<button type=\"submit\" name=\"action\" value=\"deny\" class=\"btn btn-danger\">Deny</button>\n",
    );
    content.push_str(
        "<button type=\"submit\" name=\"action\" value=\"authorize\" class=\"btn btn-primary\">Authorize</button>\n",
    );
    content.push_str("</div>\n</form>\n</div>");

    html_page("Authorize", &content)
}

/// Renders an error page, used when the client cannot be redirected to.
pub fn render_error_page(error_code: &str, error_description: &str) -> String {
    let mut content = String::with_capacity(512);
    content.push_str("<div class=\"card\" style=\"text-align: center;\">\n");
    content.push_str("<div class=\"card-title\">Authorization Error</div>\n<div>");
    content.push_str(&html_escape(error_description));
    content.push_str("</div>\n<div class=\"error-code\">");
    content.push_str(&html_escape(error_code));
    content.push_str("</div>\n</div>");
    html_page("Error", &content)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
