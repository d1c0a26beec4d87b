//! Facade behavior against a scripted in-memory backend.

use sqlsrv_adapter::db::{
    map_type, AbstractType, AdapterError, ConnectionConfig, DriverKind, Execution, ForwardRows,
    KeyKind, Length, NativeConnection, NativeConnector, NativeError, ScrollRows, Value,
};
use sqlsrv_adapter::dialect::{Direction, Query};
use sqlsrv_adapter::{DatabaseAdapter, SqlSrvAdapter};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone)]
enum Reply {
    Rows(Vec<&'static str>, Vec<Vec<Value>>),
    Done,
    Fail(i64, &'static str),
}

#[derive(Default)]
struct Script {
    /// `(fragment, reply)`: the first fragment contained in the SQL wins.
    replies: Vec<(&'static str, Reply)>,
    executed: Vec<String>,
    failed_connects: u32,
    connects: u32,
    closes: u32,
}

type Shared = Rc<RefCell<Script>>;

struct ScriptedConnector {
    kind: DriverKind,
    script: Shared,
}

impl NativeConnector for ScriptedConnector {
    fn kind(&self) -> DriverKind {
        self.kind
    }

    fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn NativeConnection>, NativeError> {
        let mut script = self.script.borrow_mut();
        if script.failed_connects > 0 {
            script.failed_connects -= 1;
            return Err(NativeError::new(18456, "Login failed for user 'app'."));
        }
        script.connects += 1;
        Ok(Box::new(ScriptedConnection {
            kind: self.kind,
            script: self.script.clone(),
            last_error: None,
        }))
    }
}

struct ScriptedConnection {
    kind: DriverKind,
    script: Shared,
    last_error: Option<NativeError>,
}

impl NativeConnection for ScriptedConnection {
    fn execute(&mut self, sql: &str) -> Result<Execution, NativeError> {
        let reply = {
            let mut script = self.script.borrow_mut();
            script.executed.push(sql.to_string());
            script
                .replies
                .iter()
                .find(|(fragment, _)| sql.contains(fragment))
                .map(|(_, reply)| reply.clone())
                .unwrap_or(Reply::Done)
        };

        let result = match reply {
            Reply::Done => Ok(Execution::Done),
            Reply::Fail(code, message) => Err(NativeError::new(code, message)),
            Reply::Rows(columns, rows) => {
                let columns = columns.into_iter().map(String::from).collect();
                Ok(match self.kind {
                    DriverKind::SqlSrv => Execution::Rows(Box::new(ForwardRows::new(columns, rows))),
                    DriverKind::Mssql => Execution::Rows(Box::new(ScrollRows::new(columns, rows))),
                })
            }
        };
        self.last_error = result.as_ref().err().cloned();
        result
    }

    fn last_error(&self) -> Option<NativeError> {
        self.last_error.clone()
    }

    fn close(&mut self) -> Result<(), NativeError> {
        self.script.borrow_mut().closes += 1;
        Ok(())
    }
}

fn scripted(kind: DriverKind, replies: Vec<(&'static str, Reply)>) -> (SqlSrvAdapter, Shared) {
    let script = Rc::new(RefCell::new(Script {
        replies,
        ..Default::default()
    }));
    let connector = ScriptedConnector {
        kind,
        script: script.clone(),
    };
    let adapter = SqlSrvAdapter::with_connector(ConnectionConfig::new("app"), Box::new(connector));
    (adapter, script)
}

fn connected(kind: DriverKind, replies: Vec<(&'static str, Reply)>) -> (SqlSrvAdapter, Shared) {
    let (mut adapter, script) = scripted(kind, replies);
    assert!(adapter.connect());
    (adapter, script)
}

const CATALOG_COLUMNS: [&str; 6] = ["Field", "Type", "Length", "Null", "Default", "Key"];

fn users_catalog() -> Reply {
    Reply::Rows(
        CATALOG_COLUMNS.to_vec(),
        vec![
            vec![
                Value::from("id"),
                Value::from("int"),
                Value::Int(4),
                Value::from("NO"),
                Value::Null,
                Value::Int(1),
            ],
            vec![
                Value::from("name"),
                Value::from("varchar"),
                Value::Int(255),
                Value::from("YES"),
                Value::Null,
                Value::Int(0),
            ],
        ],
    )
}

fn executed(script: &Shared) -> Vec<String> {
    script.borrow().executed.clone()
}

#[test]
fn test_describe_users() {
    let (mut adapter, _) = connected(DriverKind::Mssql, vec![("INFORMATION_SCHEMA.COLUMNS", users_catalog())]);
    let schema = adapter.describe("Users").unwrap();

    assert_eq!(schema.len(), 2);
    let id = &schema["id"];
    assert_eq!(id.column_type, AbstractType::Integer);
    assert!(!id.nullable);
    assert_eq!(id.key, Some(KeyKind::Primary));

    let name = &schema["name"];
    assert_eq!(name.column_type, AbstractType::String);
    assert_eq!(name.length, Some(Length::Size(255)));
    assert!(name.nullable);
    assert_eq!(name.key, None);
}

#[test]
fn test_describe_unknown_table_is_empty() {
    let (mut adapter, _) = connected(
        DriverKind::SqlSrv,
        vec![("INFORMATION_SCHEMA.COLUMNS", Reply::Rows(CATALOG_COLUMNS.to_vec(), vec![]))],
    );
    assert!(adapter.describe("Nope").unwrap().is_empty());
}

#[test]
fn test_failing_statement_carries_sql() {
    let (mut adapter, _) = connected(
        DriverKind::Mssql,
        vec![("FROM [missing]", Reply::Fail(208, "Invalid object name 'missing'."))],
    );

    let sql = "SELECT * FROM [missing]";
    let err = adapter.execute(sql).unwrap_err();
    assert!(err.to_string().contains(sql));
    assert_eq!(err.code(), Some(208));
    match &err {
        AdapterError::Query { sql: failed, message, .. } => {
            assert_eq!(failed, sql);
            assert_eq!(message, "Invalid object name 'missing'.");
        }
        other => panic!("expected a query error, got {:?}", other),
    }

    let native = adapter.error().unwrap();
    assert_eq!(native.code, 208);
    assert!(adapter.is_connected());
}

#[test]
fn test_failed_connect_can_retry() {
    let (mut adapter, script) = scripted(DriverKind::Mssql, vec![]);
    script.borrow_mut().failed_connects = 1;

    assert!(!adapter.connect());
    assert!(!adapter.is_connected());
    assert!(adapter.connect_error().is_some());

    assert!(adapter.connect());
    assert!(adapter.is_connected());
    assert!(adapter.connect_error().is_none());
    assert_eq!(script.borrow().connects, 1);

    assert!(adapter.disconnect());
    assert!(adapter.disconnect());
    assert!(!adapter.is_connected());
    assert_eq!(script.borrow().closes, 1);
}

#[test]
fn test_sources_in_catalog_order() {
    let (mut adapter, script) = connected(
        DriverKind::SqlSrv,
        vec![(
            "[INFORMATION_SCHEMA].[TABLES]",
            Reply::Rows(
                vec!["TABLE_NAME"],
                vec![vec![Value::from("users")], vec![Value::from("orders")], vec![Value::from("audit")]],
            ),
        )],
    );
    assert_eq!(adapter.sources().unwrap(), vec!["users", "orders", "audit"]);
    assert_eq!(
        executed(&script),
        vec!["SELECT TABLE_NAME FROM [INFORMATION_SCHEMA].[TABLES]"]
    );
}

#[test]
fn test_create_with_explicit_identity() {
    let (mut adapter, script) = connected(DriverKind::Mssql, vec![("INFORMATION_SCHEMA.COLUMNS", users_catalog())]);

    let id = adapter
        .create(&Query::new("users").set("id", 7).set("name", "Ann"))
        .unwrap();
    assert_eq!(id, Some(7));

    let statements = executed(&script);
    assert_eq!(
        &statements[1..],
        &[
            "SET IDENTITY_INSERT [users] ON".to_string(),
            "INSERT INTO [users] ([id], [name]) VALUES (7, 'Ann')".to_string(),
            "SET IDENTITY_INSERT [users] OFF".to_string(),
        ]
    );
}

#[test]
fn test_create_on_schema_qualified_table() {
    let (mut adapter, script) = connected(
        DriverKind::Mssql,
        vec![("TABLE_NAME = 'users' AND TABLE_SCHEMA = 'dbo'", users_catalog())],
    );

    let id = adapter
        .create(&Query::new("dbo.users").set("id", 7).set("name", "Ann"))
        .unwrap();
    assert_eq!(id, Some(7));

    let statements = executed(&script);
    assert!(statements[0].contains("OBJECT_ID('dbo.users')"));
    assert_eq!(
        &statements[1..],
        &[
            "SET IDENTITY_INSERT [dbo].[users] ON".to_string(),
            "INSERT INTO [dbo].[users] ([id], [name]) VALUES (7, 'Ann')".to_string(),
            "SET IDENTITY_INSERT [dbo].[users] OFF".to_string(),
        ]
    );
}

#[test]
fn test_identity_insert_switched_off_after_failure() {
    let (mut adapter, script) = connected(
        DriverKind::Mssql,
        vec![
            ("INFORMATION_SCHEMA.COLUMNS", users_catalog()),
            ("INSERT INTO", Reply::Fail(2627, "Violation of PRIMARY KEY constraint.")),
        ],
    );

    let err = adapter
        .create(&Query::new("users").set("id", 1).set("name", "Dup"))
        .unwrap_err();
    assert_eq!(err.code(), Some(2627));
    assert_eq!(
        executed(&script).last().map(String::as_str),
        Some("SET IDENTITY_INSERT [users] OFF")
    );
}

#[test]
fn test_create_reads_generated_identity() {
    let (mut adapter, script) = connected(
        DriverKind::SqlSrv,
        vec![
            ("INFORMATION_SCHEMA.COLUMNS", users_catalog()),
            ("@@IDENTITY", Reply::Rows(vec!["insertId"], vec![vec![Value::from("12")]])),
        ],
    );

    let id = adapter.create(&Query::new("users").set("name", "Bo")).unwrap();
    assert_eq!(id, Some(12));

    let statements = executed(&script);
    assert!(statements.iter().all(|s| !s.contains("IDENTITY_INSERT")));
    assert_eq!(statements.last().map(String::as_str), Some("SELECT @@IDENTITY AS insertId"));
}

#[test]
fn test_last_insert_id_zero_or_empty_is_none() {
    for value in [Value::from("0"), Value::Int(0), Value::from(""), Value::Null] {
        let (mut adapter, _) = connected(
            DriverKind::Mssql,
            vec![("@@IDENTITY", Reply::Rows(vec!["insertId"], vec![vec![value.clone()]]))],
        );
        assert_eq!(adapter.last_insert_id().unwrap(), None, "{:?}", value);
    }

    let (mut adapter, _) = connected(DriverKind::Mssql, vec![("@@IDENTITY", Reply::Rows(vec!["insertId"], vec![]))]);
    assert_eq!(adapter.last_insert_id().unwrap(), None);
}

#[test]
fn test_read_pages_and_closes() {
    let rows = (21..=23)
        .map(|i| vec![Value::Int(i), Value::Int(i)])
        .collect::<Vec<_>>();
    let (mut adapter, script) = connected(
        DriverKind::Mssql,
        vec![("ROW_NUMBER()", Reply::Rows(vec!["id", "__row_number__"], rows))],
    );

    let query = Query::new("users")
        .fields(["id"])
        .order_by("id", Direction::Asc)
        .limit(3)
        .offset(20);
    let mut result = adapter.read(&query).unwrap();
    assert!(executed(&script)[0].contains("BETWEEN 21 AND 23"));
    assert_eq!(adapter.result_columns(&result), vec!["id", "__row_number__"]);

    let first = result.next().unwrap();
    assert_eq!(first.get("id"), Some(&Value::Int(21)));
    let second = result.next().unwrap();
    assert_eq!(second.get("id"), Some(&Value::Int(22)));
    assert_eq!(result.position(), 2);

    assert!(result.supports_prev());
    let back = result.prev().unwrap();
    assert_eq!(back.get("id"), Some(&Value::Int(21)));
    assert_eq!(result.position(), 1);

    result.close();
    result.close();
    assert!(result.is_closed());
    assert!(result.next().is_none());
    assert!(result.prev().is_none());
}

#[test]
fn test_forward_only_backend_has_no_prev() {
    let (mut adapter, _) = connected(
        DriverKind::SqlSrv,
        vec![("FROM [t]", Reply::Rows(vec!["a"], vec![vec![Value::Int(1)], vec![Value::Int(2)]]))],
    );
    let mut result = adapter.read(&Query::new("t")).unwrap();
    assert!(!result.supports_prev());
    result.next();
    result.next();
    assert!(result.prev().is_none());
}

#[test]
fn test_update_and_delete_never_alias() {
    let (mut adapter, script) = connected(DriverKind::Mssql, vec![]);

    let update = Query::new("users").alias("u").set("name", "Cy").filter("id", 3);
    assert!(adapter.update(&update).unwrap());
    let delete = Query::new("users").alias("u").filter("id", 3);
    assert!(adapter.delete(&delete).unwrap());

    let statements = executed(&script);
    assert_eq!(statements[0], "UPDATE [users] SET [name] = 'Cy' WHERE [id] = 3");
    assert_eq!(statements[1], "DELETE FROM [users] WHERE [id] = 3");
}

#[test]
fn test_describe_then_create_table_round_trip() {
    let (mut adapter, script) = connected(DriverKind::Mssql, vec![("INFORMATION_SCHEMA.COLUMNS", users_catalog())]);
    let schema = adapter.describe("users").unwrap();
    assert!(adapter.create_table("users_copy", &schema).unwrap());

    let sql = executed(&script).pop().unwrap();
    assert!(sql.starts_with("CREATE TABLE [users_copy] (\n"));

    let body = sql
        .split_once("(\n")
        .and_then(|(_, rest)| rest.rsplit_once("\n)"))
        .map(|(body, _)| body)
        .unwrap();
    let definitions: Vec<&str> = body.split(",\n").collect();
    assert_eq!(definitions.len(), schema.len());

    for (definition, column) in definitions.iter().zip(schema.values()) {
        let mut words = definition.split(' ');
        let name = words.next().unwrap();
        let native = words.next().unwrap();
        assert_eq!(name, format!("[{}]", column.name));
        assert_eq!(map_type(native, None).0, column.column_type, "{}", definition);
    }
    assert!(body.contains("IDENTITY (1, 1) NOT NULL"));
}

#[test]
fn test_operations_before_connect() {
    let (mut adapter, _) = scripted(DriverKind::Mssql, vec![]);
    assert!(matches!(adapter.describe("users"), Err(AdapterError::NotConnected)));
    assert!(adapter.error().is_none());
}
