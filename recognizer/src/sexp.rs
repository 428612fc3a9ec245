//! S-expression plist helpers shared by the config loader, the classifier
//! artifact codec, and the landmark replay reader.

use lexpr::Value;

/// Find the value following `:key` in a plist.
/// Walks cons pairs directly.  Handles both `Value::Keyword("key")` and
/// `Value::Symbol(":key")` forms, depending on parser options.
pub fn plist_get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let prefixed = format!(":{}", key);
    let mut current = value;
    while let Value::Cons(pair) = current {
        let is_key = match pair.car() {
            Value::Keyword(k) => k.as_ref() == key,
            Value::Symbol(s) => s.as_ref() == prefixed,
            _ => false,
        };
        if is_key {
            return match pair.cdr() {
                Value::Cons(next) => Some(next.car()),
                _ => None,
            };
        }
        current = pair.cdr();
    }
    None
}

/// Extract a plist value rendered as a string.
pub fn get_keyword(value: &Value, key: &str) -> Option<String> {
    let val = plist_get(value, key)?;
    Some(match val {
        Value::Keyword(v) => v.to_string(),
        Value::Symbol(v) => {
            let s = v.to_string();
            s.strip_prefix(':').unwrap_or(&s).to_string()
        }
        Value::String(v) => v.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => if *b { "t" } else { "nil" }.to_string(),
        Value::Null | Value::Nil => "nil".to_string(),
        other => other.to_string(),
    })
}

/// Extract an integer value from a plist.
pub fn get_int(value: &Value, key: &str) -> Option<i64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Extract a floating-point value from a plist.
pub fn get_float(value: &Value, key: &str) -> Option<f64> {
    plist_get(value, key).and_then(number)
}

/// Extract a boolean from a plist.  Treats "nil" as false, anything else as true.
pub fn get_bool(value: &Value, key: &str) -> Option<bool> {
    get_keyword(value, key).map(|s| s != "nil")
}

/// Whether a value is an empty list or the `nil` symbol.
pub fn is_nil(value: &Value) -> bool {
    match value {
        Value::Null | Value::Nil => true,
        Value::Bool(b) => !b,
        Value::Symbol(s) => s.as_ref() == "nil",
        _ => false,
    }
}

/// Numeric value as f64 (integers included).
pub fn number(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Elements of a proper list.  `nil` yields an empty vec; vectors are
/// accepted as well.
pub fn list_items(value: &Value) -> Vec<&Value> {
    let mut items = Vec::new();
    match value {
        Value::Vector(elems) => items.extend(elems.iter()),
        _ => {
            let mut current = value;
            while let Value::Cons(pair) = current {
                items.push(pair.car());
                current = pair.cdr();
            }
        }
    }
    items
}

/// Elements of a list parsed as numbers.  Returns None if any element
/// is not numeric.
pub fn number_list(value: &Value) -> Option<Vec<f64>> {
    list_items(value).into_iter().map(number).collect()
}

/// Escape a string for s-expression output.
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render a boolean the elisp way.
pub fn flag(b: bool) -> &'static str {
    if b {
        "t"
    } else {
        "nil"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plist_get_keyword_forms() {
        let v = lexpr::from_str("(:type :hello :version 1)").unwrap();
        assert_eq!(get_keyword(&v, "type").as_deref(), Some("hello"));
        assert_eq!(get_int(&v, "version"), Some(1));
        assert!(get_keyword(&v, "missing").is_none());
    }

    #[test]
    fn test_get_float_accepts_integers() {
        let v = lexpr::from_str("(:a 2 :b -0.25)").unwrap();
        assert_eq!(get_float(&v, "a"), Some(2.0));
        assert_eq!(get_float(&v, "b"), Some(-0.25));
    }

    #[test]
    fn test_get_bool() {
        let v = lexpr::from_str("(:on t :off nil)").unwrap();
        assert_eq!(get_bool(&v, "on"), Some(true));
        assert_eq!(get_bool(&v, "off"), Some(false));
    }

    #[test]
    fn test_key_without_value() {
        let v = lexpr::from_str("(:dangling)").unwrap();
        assert!(plist_get(&v, "dangling").is_none());
    }

    #[test]
    fn test_number_list() {
        let v = lexpr::from_str("(1 2.5 -3)").unwrap();
        assert_eq!(number_list(&v), Some(vec![1.0, 2.5, -3.0]));
        let bad = lexpr::from_str("(1 \"x\")").unwrap();
        assert!(number_list(&bad).is_none());
    }

    #[test]
    fn test_is_nil() {
        assert!(is_nil(&lexpr::from_str("()").unwrap()));
        assert!(is_nil(&lexpr::from_str("nil").unwrap()));
        assert!(!is_nil(&lexpr::from_str("(1)").unwrap()));
    }

    #[test]
    fn test_escape_string() {
        assert_eq!(escape_string("say \"hi\""), "say \\\"hi\\\"");
        assert_eq!(escape_string("a\\b"), "a\\\\b");
    }
}
