//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Log-safe truncation for large strings (cuts on a char boundary).
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut end = max;
  while !s.is_char_boundary(end) {
    end -= 1;
  }
  format!("{}… ({} bytes total)", &s[..end], s.len())
}

/// Flatten a JSON response payload into prompt text: strings verbatim, objects and
/// arrays as compact JSON.
pub fn payload_text(v: &serde_json::Value) -> String {
  match v {
    serde_json::Value::String(s) => s.clone(),
    serde_json::Value::Null => String::new(),
    other => other.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fills_named_placeholders() {
    assert_eq!(fill_template("{a} and {b}", &[("a", "x"), ("b", "y")]), "x and y");
  }

  #[test]
  fn truncation_respects_char_boundaries() {
    let s = "héllo wörld";
    let t = trunc_for_log(s, 2);
    assert!(t.starts_with('h'));
    assert!(t.ends_with("bytes total)"));
    assert_eq!(trunc_for_log("short", 10), "short");
  }

  #[test]
  fn payload_text_unwraps_strings() {
    assert_eq!(payload_text(&serde_json::json!("hi")), "hi");
    assert_eq!(payload_text(&serde_json::json!({ "a": 1 })), "{\"a\":1}");
  }
}
