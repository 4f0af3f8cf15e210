//! Table-name isolation for module schemas

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::application::errors::{ModuleError, ModuleResult};

static CREATE_TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)CREATE\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?(["`\[]?[^\s("`\]]+["`\]]?)"#)
        .expect("create table pattern is valid")
});

/// Replace `--` and `/* */` comments with a space. Quoted text is kept as is.
fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;
    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                while chars.next_if(|&n| n != '\n').is_some() {}
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Every table a statement creates, quoting stripped
pub fn created_tables(statement: &str) -> Vec<String> {
    let statement = strip_comments(statement);
    CREATE_TABLE_RE
        .captures_iter(&statement)
        .filter_map(|caps| caps.get(2))
        .map(|m| m.as_str().trim_matches(|c| matches!(c, '`' | '"' | '[' | ']')).to_string())
        .collect()
}

/// Reject any `CREATE TABLE` whose target is not prefixed with `<module_id>_`.
/// Pure text check, run before anything touches storage.
pub fn validate_schema(module_id: &str, statements: &[String]) -> ModuleResult<()> {
    let prefix = format!("{}_", module_id);
    for statement in statements {
        for table in created_tables(statement) {
            if !table.starts_with(&prefix) {
                return Err(ModuleError::SchemaIsolation {
                    module_id: module_id.to_string(),
                    table,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prefixed_tables_pass() {
        let sql = stmts(&[
            "CREATE TABLE IF NOT EXISTS alpha_items (id INTEGER PRIMARY KEY);
             create table alpha_logs(id INTEGER);",
            "INSERT INTO button_configs (label) VALUES ('x');",
        ]);
        assert!(validate_schema("alpha", &sql).is_ok());
    }

    #[test]
    fn test_unprefixed_table_rejected() {
        let err = validate_schema("beta", &stmts(&["CREATE TABLE items (id INTEGER)"])).unwrap_err();
        assert_eq!(err.to_string(), "Table 'items' must be prefixed with beta_");
    }

    #[test]
    fn test_quoting_is_stripped() {
        assert_eq!(created_tables(r#"CREATE TABLE "alpha_q" (id INTEGER)"#), vec!["alpha_q"]);
        assert_eq!(created_tables("CREATE TABLE IF NOT EXISTS `alpha_b` (id INTEGER)"), vec!["alpha_b"]);
        assert_eq!(created_tables("CREATE TABLE [alpha_s](id INTEGER)"), vec!["alpha_s"]);
    }

    #[test]
    fn test_comments_cannot_hide_a_table() {
        assert_eq!(created_tables("CREATE/**/TABLE items (id INTEGER)"), vec!["items"]);
        assert_eq!(created_tables("CREATE TABLE -- note\n items (id INTEGER)"), vec!["items"]);
        assert_eq!(created_tables("CREATE /* a */ TABLE /* b */ IF NOT EXISTS beta_x(id)"), vec!["beta_x"]);
        assert!(validate_schema("beta", &stmts(&["CREATE/**/TABLE items (id INTEGER)"])).is_err());
    }

    #[test]
    fn test_comment_markers_inside_literals_are_kept() {
        let sql = "INSERT INTO beta_x VALUES ('--', '/*'); CREATE TABLE beta_y (id INTEGER); -- done";
        assert_eq!(created_tables(sql), vec!["beta_y"]);
        assert_eq!(strip_comments("SELECT 'a--b' -- gone"), "SELECT 'a--b'  ");
    }

    #[test]
    fn test_prefix_needs_underscore() {
        assert!(validate_schema("alpha", &stmts(&["CREATE TABLE alphaitems (id INTEGER)"])).is_err());
    }
}
