//! Statement templates and placeholder substitution.

use super::descriptor::StatementKind;

/// Column added by the paging wrapper to number the inner rows.
pub const ROW_NUMBER_COLUMN: &str = "[__row_number__]";

pub const READ: &str =
    "SELECT {:limit} {:fields} FROM {:source} {:joins} {:conditions} {:group} {:order} {:comment}";

/// Read with an offset: number the rows of the inner select over the requested
/// order, then keep the requested range.
pub const PAGED: &str = "SELECT * FROM (SELECT {:fields}, ROW_NUMBER() OVER ({:order}) AS [__row_number__] FROM {:source} {:joins} {:conditions} {:group}) AS [__paged__] {:limit} ORDER BY [__row_number__] {:comment}";

pub const CREATE: &str = "INSERT INTO {:source} ({:fields}) VALUES ({:values}) {:comment}";

pub const UPDATE: &str = "UPDATE {:source} SET {:data} {:conditions} {:comment}";

pub const DELETE: &str = "DELETE {:flags} FROM {:source} {:aliases} {:conditions} {:comment}";

pub const SCHEMA: &str = "CREATE TABLE {:source} (\n{:columns}\n) {:indexes} {:comment}";

pub const JOIN: &str = "{:type} JOIN {:source} {:constraint}";

pub const IDENTITY_INSERT: &str = "SET IDENTITY_INSERT {:source} {:flags}";

pub fn template(kind: StatementKind) -> &'static str {
    match kind {
        StatementKind::Read => READ,
        StatementKind::Create => CREATE,
        StatementKind::Update => UPDATE,
        StatementKind::Delete => DELETE,
        StatementKind::Schema => SCHEMA,
        StatementKind::Join => JOIN,
    }
}

/// Substitute `{:name}` placeholders.
///
/// The template is processed word by word (split on single spaces). A word that
/// is nothing but a placeholder with no value is dropped, so missing clauses do
/// not leave doubled spaces behind. Placeholders embedded in a larger word are
/// replaced in place, with missing values rendering as nothing.
pub fn fill<'a>(template: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> String {
    let mut words = Vec::new();

    for word in template.split(' ').filter(|w| !w.is_empty()) {
        if let Some(name) = sole_placeholder(word) {
            match lookup(name) {
                Some(value) if !value.is_empty() => words.push(value.to_string()),
                _ => {}
            }
            continue;
        }
        words.push(substitute(word, &lookup));
    }

    words.join(" ")
}

fn sole_placeholder(word: &str) -> Option<&str> {
    let name = word.strip_prefix("{:")?.strip_suffix('}')?;
    (!name.contains(['{', '}'])).then_some(name)
}

fn substitute<'a>(word: &str, lookup: &impl Fn(&str) -> Option<&'a str>) -> String {
    let mut out = String::with_capacity(word.len());
    let mut rest = word;

    while let Some(start) = rest.find("{:") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(lookup(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<&'static str> {
        move |name| pairs.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
    }

    #[test]
    fn test_missing_placeholders_collapse() {
        let sql = fill(READ, lookup(&[("fields", "*"), ("source", "[users]")]));
        assert_eq!(sql, "SELECT * FROM [users]");
    }

    #[test]
    fn test_all_placeholders() {
        let sql = fill(
            READ,
            lookup(&[
                ("limit", "TOP 5"),
                ("fields", "[id]"),
                ("source", "[users]"),
                ("conditions", "WHERE [id] > 1"),
                ("order", "ORDER BY [id] ASC"),
                ("comment", "/* list */"),
            ]),
        );
        assert_eq!(
            sql,
            "SELECT TOP 5 [id] FROM [users] WHERE [id] > 1 ORDER BY [id] ASC /* list */"
        );
    }

    #[test]
    fn test_embedded_placeholder() {
        let sql = fill(
            CREATE,
            lookup(&[("source", "[t]"), ("fields", "[a], [b]"), ("values", "1, 2")]),
        );
        assert_eq!(sql, "INSERT INTO [t] ([a], [b]) VALUES (1, 2)");

        let sql = fill(SCHEMA, lookup(&[("source", "[t]"), ("columns", "[a] integer NULL")]));
        assert_eq!(sql, "CREATE TABLE [t] (\n[a] integer NULL\n)");
    }

    #[test]
    fn test_empty_value_is_missing() {
        let sql = fill(DELETE, lookup(&[("flags", ""), ("source", "[t]")]));
        assert_eq!(sql, "DELETE FROM [t]");
    }

    #[test]
    fn test_unterminated_placeholder_kept() {
        assert_eq!(fill("SELECT {:fields", |_| None), "SELECT {:fields");
    }
}
