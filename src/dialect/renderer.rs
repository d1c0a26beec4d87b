use super::descriptor::{Page, QueryDescriptor, Slot, StatementKind};
use super::templates::{self, ROW_NUMBER_COLUMN};

/// Ordering used when a paged read asks for no order. The window function
/// requires one.
const UNORDERED: &str = "ORDER BY (SELECT NULL)";

/// Render a descriptor to SQL text.
///
/// Reads with a nonzero offset use the row-numbering wrapper; reads with only a
/// limit use `TOP n`. Aliases are dropped for UPDATE and DELETE.
pub fn render(descriptor: &QueryDescriptor) -> String {
    let kind = descriptor.kind();
    let page = descriptor.page();

    let source = source_clause(descriptor);
    let limit = match kind {
        StatementKind::Read => limit_clause(page).or_else(|| descriptor.get(Slot::Limit).map(str::to_string)),
        _ => None,
    };
    let paged = kind == StatementKind::Read && page.needs_row_numbers();

    let template = if paged {
        templates::PAGED
    } else {
        templates::template(kind)
    };

    templates::fill(template, |name| {
        let slot = Slot::from_name(name)?;
        match slot {
            Slot::Source => Some(source.as_str()),
            Slot::Limit => limit.as_deref(),
            Slot::Order if paged => Some(descriptor.get(Slot::Order).unwrap_or(UNORDERED)),
            Slot::Aliases if !kind.allows_alias() => None,
            _ => descriptor.get(slot),
        }
    })
}

/// Source table, with its alias where the statement kind permits one.
fn source_clause(descriptor: &QueryDescriptor) -> String {
    let source = descriptor.get(Slot::Source).unwrap_or_default();
    match descriptor.get(Slot::Aliases) {
        Some(alias) if descriptor.kind().allows_alias() => format!("{} AS {}", source, alias),
        _ => source.to_string(),
    }
}

/// Row-limit clause: `TOP n` from the first row, a row-number range otherwise.
/// `None` when no limit is requested.
pub fn limit_clause(page: Page) -> Option<String> {
    let (first, last) = page.bounds()?;
    if page.offset == 0 {
        return Some(format!("TOP {}", last));
    }
    Some(format!(
        "WHERE {} BETWEEN {} AND {}",
        ROW_NUMBER_COLUMN, first, last
    ))
}

/// `SET IDENTITY_INSERT` for an already quoted table name.
pub fn identity_insert(source: &str, enabled: bool) -> String {
    let flag = if enabled { "ON" } else { "OFF" };
    templates::fill(templates::IDENTITY_INSERT, |name| match name {
        "source" => Some(source),
        "flags" => Some(flag),
        _ => None,
    })
}

/// An INSERT plus the identity-insert toggles around it, when needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateStatements {
    pub prelude: Option<String>,
    pub insert: String,
    pub epilogue: Option<String>,
}

impl CreateStatements {
    /// Statements in execution order.
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.prelude
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.insert.as_str()))
            .chain(self.epilogue.as_deref())
    }
}

/// Render a create descriptor. With `explicit_identity`, the insert writes the
/// table's identity column and is wrapped in identity-insert mode.
pub fn render_create(descriptor: &QueryDescriptor, explicit_identity: bool) -> CreateStatements {
    let insert = render(descriptor);
    if !explicit_identity {
        return CreateStatements {
            prelude: None,
            insert,
            epilogue: None,
        };
    }
    let source = descriptor.get(Slot::Source).unwrap_or_default();
    CreateStatements {
        prelude: Some(identity_insert(source, true)),
        insert,
        epilogue: Some(identity_insert(source, false)),
    }
}

/// Quote an identifier with brackets. Dotted names are quoted per part; `*`
/// and parts already in brackets pass through.
pub fn quote_name(name: &str) -> String {
    name.split('.')
        .map(|part| {
            let part = part.trim();
            if part == "*" || (part.starts_with('[') && part.ends_with(']')) {
                part.to_string()
            } else {
                format!("[{}]", part.replace(']', "]]"))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read() -> QueryDescriptor {
        QueryDescriptor::new(StatementKind::Read)
            .with(Slot::Fields, "[id], [name]")
            .with(Slot::Source, "[users]")
    }

    #[test]
    fn test_no_limit_no_pagination() {
        let sql = render(&read().with(Slot::Order, "ORDER BY [id] ASC"));
        assert_eq!(sql, "SELECT [id], [name] FROM [users] ORDER BY [id] ASC");
        assert!(!sql.contains("TOP"));
        assert!(!sql.contains("ROW_NUMBER"));

        // An offset alone does not page.
        let sql = render(&read().paged(Page::new(None, 20)));
        assert_eq!(sql, "SELECT [id], [name] FROM [users]");
    }

    #[test]
    fn test_limit_without_offset_uses_top() {
        let sql = render(&read().paged(Page::new(Some(10), 0)));
        assert_eq!(sql, "SELECT TOP 10 [id], [name] FROM [users]");
    }

    #[test]
    fn test_limit_with_offset_uses_row_numbers() {
        let sql = render(
            &read()
                .with(Slot::Conditions, "WHERE [active] = 1")
                .with(Slot::Order, "ORDER BY [name] DESC")
                .paged(Page::new(Some(10), 20)),
        );
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT [id], [name], ROW_NUMBER() OVER (ORDER BY [name] DESC) \
             AS [__row_number__] FROM [users] WHERE [active] = 1 ) AS [__paged__] \
             WHERE [__row_number__] BETWEEN 21 AND 30 ORDER BY [__row_number__]"
        );
        assert!(!sql.contains("TOP"));
    }

    #[test]
    fn test_paged_without_order() {
        let sql = render(&read().paged(Page::new(Some(5), 5)));
        assert!(sql.contains("ROW_NUMBER() OVER (ORDER BY (SELECT NULL))"));
        assert!(sql.contains("BETWEEN 6 AND 10"));
    }

    #[test]
    fn test_limit_clause() {
        assert_eq!(limit_clause(Page::new(Some(10), 0)).as_deref(), Some("TOP 10"));
        assert_eq!(
            limit_clause(Page::new(Some(10), 20)).as_deref(),
            Some("WHERE [__row_number__] BETWEEN 21 AND 30")
        );
        assert_eq!(limit_clause(Page::new(None, 20)), None);
        assert_eq!(limit_clause(Page::new(Some(0), 0)), None);
    }

    /// Rows `0..total` in their requested order; the wrapper numbers them from
    /// 1 and keeps the bounded range. That must equal skipping `offset` rows
    /// and taking the first `limit`.
    #[test]
    fn test_paging_equivalence() {
        let total = 37u64;
        let ordered: Vec<u64> = (0..total).rev().collect();

        for limit in 1..=12u64 {
            for offset in 0..=total + 2 {
                let page = Page::new(Some(limit), offset);
                let (first, last) = page.bounds().unwrap();

                let wrapped: Vec<u64> = ordered
                    .iter()
                    .enumerate()
                    .map(|(i, row)| (i as u64 + 1, *row))
                    .filter(|(n, _)| *n >= first && *n <= last)
                    .map(|(_, row)| row)
                    .collect();
                let direct: Vec<u64> = ordered
                    .iter()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .copied()
                    .collect();

                assert_eq!(wrapped, direct, "limit {} offset {}", limit, offset);
            }
        }
    }

    #[test]
    fn test_alias_on_read_and_join() {
        let sql = render(&read().with(Slot::Aliases, "[u]"));
        assert_eq!(sql, "SELECT [id], [name] FROM [users] AS [u]");

        let sql = render(
            &QueryDescriptor::new(StatementKind::Join)
                .with(Slot::Type, "LEFT")
                .with(Slot::Source, "[posts]")
                .with(Slot::Aliases, "[p]")
                .with(Slot::Constraint, "ON [u].[id] = [p].[user_id]"),
        );
        assert_eq!(sql, "LEFT JOIN [posts] AS [p] ON [u].[id] = [p].[user_id]");
    }

    #[test]
    fn test_update_and_delete_drop_alias() {
        let update = render(
            &QueryDescriptor::new(StatementKind::Update)
                .with(Slot::Source, "[users]")
                .with(Slot::Aliases, "[u]")
                .with(Slot::Data, "[name] = 'x'")
                .with(Slot::Conditions, "WHERE [id] = 1"),
        );
        assert_eq!(update, "UPDATE [users] SET [name] = 'x' WHERE [id] = 1");

        let delete = render(
            &QueryDescriptor::new(StatementKind::Delete)
                .with(Slot::Source, "[users]")
                .with(Slot::Aliases, "[u]")
                .with(Slot::Conditions, "WHERE [id] = 1"),
        );
        assert_eq!(delete, "DELETE FROM [users] WHERE [id] = 1");

        for sql in [update, delete] {
            assert!(!sql.contains("[u]"));
            assert!(!sql.contains(" AS "));
        }
    }

    #[test]
    fn test_limit_ignored_outside_reads() {
        let sql = render(
            &QueryDescriptor::new(StatementKind::Delete)
                .with(Slot::Source, "[t]")
                .paged(Page::new(Some(1), 0)),
        );
        assert_eq!(sql, "DELETE FROM [t]");
    }

    #[test]
    fn test_create_with_identity() {
        let descriptor = QueryDescriptor::new(StatementKind::Create)
            .with(Slot::Source, "[dbo].[users]")
            .with(Slot::Fields, "[id], [name]")
            .with(Slot::Values, "7, 'Ann'");

        let plain = render_create(&descriptor, false);
        assert_eq!(plain.statements().collect::<Vec<_>>(), vec![
            "INSERT INTO [dbo].[users] ([id], [name]) VALUES (7, 'Ann')"
        ]);

        let wrapped = render_create(&descriptor, true);
        assert_eq!(wrapped.statements().collect::<Vec<_>>(), vec![
            "SET IDENTITY_INSERT [dbo].[users] ON",
            "INSERT INTO [dbo].[users] ([id], [name]) VALUES (7, 'Ann')",
            "SET IDENTITY_INSERT [dbo].[users] OFF",
        ]);
    }

    #[test]
    fn test_schema_template() {
        let sql = render(
            &QueryDescriptor::new(StatementKind::Schema)
                .with(Slot::Source, "[users]")
                .with(Slot::Columns, "[id] integer IDENTITY (1, 1) NOT NULL,\n[name] varchar(255) NULL"),
        );
        assert_eq!(
            sql,
            "CREATE TABLE [users] (\n[id] integer IDENTITY (1, 1) NOT NULL,\n[name] varchar(255) NULL\n)"
        );
    }

    #[test]
    fn test_quote_name() {
        assert_eq!(quote_name("users"), "[users]");
        assert_eq!(quote_name("dbo.users"), "[dbo].[users]");
        assert_eq!(quote_name("u.*"), "[u].*");
        assert_eq!(quote_name("*"), "*");
        assert_eq!(quote_name("odd]name"), "[odd]]name]");
        assert_eq!(quote_name("[already]"), "[already]");
    }

    #[test]
    fn test_rendered_sql_parses() {
        use sqlparser::dialect::MsSqlDialect;
        use sqlparser::parser::Parser;

        let statements = [
            render(&read().paged(Page::new(Some(10), 0))),
            render(&read().with(Slot::Order, "ORDER BY [id] ASC").paged(Page::new(Some(10), 20))),
            render(
                &QueryDescriptor::new(StatementKind::Update)
                    .with(Slot::Source, "[users]")
                    .with(Slot::Data, "[name] = 'x'")
                    .with(Slot::Conditions, "WHERE [id] = 1"),
            ),
            render(
                &QueryDescriptor::new(StatementKind::Delete)
                    .with(Slot::Source, "[users]")
                    .with(Slot::Conditions, "WHERE [id] = 1"),
            ),
        ];
        for sql in statements {
            assert!(
                Parser::parse_sql(&MsSqlDialect {}, &sql).is_ok(),
                "failed to parse: {}",
                sql
            );
        }
    }
}
