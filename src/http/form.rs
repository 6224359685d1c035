//! Target selection page.

/// Escape text for use inside a double-quoted HTML attribute.
pub fn html_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Render the selection form, optionally prefilled with the last target.
pub fn selection_form(prefill: Option<&str>) -> String {
    let value_attr = match prefill {
        Some(value) if !value.is_empty() => format!(" value=\"{}\"", html_escape(value)),
        _ => String::new(),
    };

    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <title>Nomad Proxy</title>
    <meta name="viewport" content="width=device-width,initial-scale=1">
    <style>
      :root {{ color-scheme: light dark; }}
      body {{ font-family: system-ui,-apple-system,Segoe UI,Roboto,sans-serif; margin: 3em auto; max-width: 42em; line-height: 1.4; }}
      label {{ font-weight: 600; display: block; margin-bottom: .5em; }}
      input[type=url] {{ width: 100%; padding: .6em .7em; font-size: 1rem; border: 1px solid #888; border-radius: .4em; }}
      button {{ padding: .65em 1.4em; font-size: 1rem; font-weight: 600; border: none; border-radius: .4em; background: #4a90e2; color: #fff; cursor: pointer; }}
      footer {{ margin-top: 2.5em; font-size: .8em; color: #666; }}
    </style>
  </head>
  <body>
    <h1>Nomad Proxy</h1>
    <form method="post" action="/" aria-label="Target selection">
      <label for="target">Screen sharing URL</label>
      <input id="target" name="target" type="url" placeholder="http://192.168.1.203:8080" required pattern="https?://.+" autofocus{value_attr}>
      <p><button type="submit">Connect</button></p>
    </form>
    <footer>If the target disconnects, reload this page to choose a new one. <a href="/reset">Reset</a></footer>
  </body>
</html>
"#
    )
}
