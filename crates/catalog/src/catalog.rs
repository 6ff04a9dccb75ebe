use arrow_schema::DataType;
use opal_common::{ColumnId, Error, Result, TableId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// DDL visibility state of a column.
///
/// `WriteOnly` models a column mid-addition: writes must populate it but
/// reads may not observe it yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnState {
    /// Fully visible.
    #[default]
    Public,
    /// Writable but not readable.
    WriteOnly,
}

/// One column's declared metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    /// Catalog-assigned id, filled in at registration when zero.
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    /// Generation expression source text; `Some` marks a generated column,
    /// which UPDATE assignments must not target.
    #[serde(default)]
    pub generated_expr: Option<String>,
    #[serde(default)]
    pub state: ColumnState,
}

impl ColumnDef {
    /// Catalog column id.
    pub fn column_id(&self) -> ColumnId {
        ColumnId(self.id)
    }

    pub fn is_generated(&self) -> bool {
        self.generated_expr.is_some()
    }
}

/// One table's declared metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    /// Owning database name.
    pub db: String,
    pub name: String,
    /// Catalog-assigned id, filled in at registration when zero.
    #[serde(default)]
    pub id: i64,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Catalog table id.
    pub fn table_id(&self) -> TableId {
        TableId(self.id)
    }

    /// Columns visible to reads: public state only.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns
            .iter()
            .filter(|c| c.state == ColumnState::Public)
    }

    /// Columns a write must populate: public plus write-only.
    pub fn writable_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter()
    }

    /// Whether the single integer primary-key column doubles as the row
    /// handle.
    pub fn pk_is_handle(&self) -> bool {
        let mut pk_cols = self.columns.iter().filter(|c| c.primary_key);
        match (pk_cols.next(), pk_cols.next()) {
            (Some(col), None) => matches!(
                col.data_type,
                DataType::Int8
                    | DataType::Int16
                    | DataType::Int32
                    | DataType::Int64
                    | DataType::UInt8
                    | DataType::UInt16
                    | DataType::UInt32
                    | DataType::UInt64
            ),
            _ => false,
        }
    }
}

/// In-memory catalog: databases mapped to tables, names case-insensitive.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    databases: HashMap<String, HashMap<String, TableDef>>,
    next_table_id: i64,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            databases: HashMap::new(),
            next_table_id: 1,
        }
    }

    /// Register a table, assigning table and column ids when unset.
    pub fn register_table(&mut self, mut table: TableDef) -> Result<()> {
        if table.db.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "table '{}' has no database",
                table.name
            )));
        }
        if table.id == 0 {
            table.id = self.next_table_id;
        }
        self.next_table_id = self.next_table_id.max(table.id + 1);
        for (i, col) in table.columns.iter_mut().enumerate() {
            if col.id == 0 {
                col.id = i as i64 + 1;
            }
        }
        self.databases
            .entry(table.db.to_ascii_lowercase())
            .or_default()
            .insert(table.name.to_ascii_lowercase(), table);
        Ok(())
    }

    /// Resolve a table by database and name.
    pub fn table_by_name(&self, db: &str, name: &str) -> Result<&TableDef> {
        self.databases
            .get(&db.to_ascii_lowercase())
            .and_then(|tables| tables.get(&name.to_ascii_lowercase()))
            .ok_or_else(|| Error::UnknownTable(format!("{db}.{name}")))
    }

    pub fn load_from_json(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let parsed: CatalogFile =
            serde_json::from_str(&s).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Self::from_tables(parsed.into_tables())
    }

    pub fn load_from_toml(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let parsed: CatalogFile =
            toml::from_str(&s).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Self::from_tables(parsed.into_tables())
    }

    /// Load a catalog file, dispatching on extension.
    pub fn load(path: &str) -> Result<Self> {
        match Path::new(path).extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::load_from_json(path),
            Some("toml") => Self::load_from_toml(path),
            Some(other) => Err(Error::InvalidConfig(format!(
                "unsupported catalog extension '.{other}'; use .json or .toml"
            ))),
            None => Err(Error::InvalidConfig(
                "catalog path must include extension .json or .toml".to_string(),
            )),
        }
    }

    fn from_tables(tables: Vec<TableDef>) -> Result<Self> {
        let mut cat = Catalog::new();
        for t in tables {
            cat.register_table(t)?;
        }
        Ok(cat)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    TableList(Vec<TableDef>),
    Wrapped { tables: Vec<TableDef> },
}

impl CatalogFile {
    fn into_tables(self) -> Vec<TableDef> {
        match self {
            Self::TableList(tables) => tables,
            Self::Wrapped { tables } => tables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Catalog, ColumnDef, ColumnState, TableDef};
    use arrow_schema::DataType;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn col(name: &str, dt: DataType) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            data_type: dt,
            id: 0,
            nullable: true,
            primary_key: false,
            generated_expr: None,
            state: ColumnState::Public,
        }
    }

    fn unique_path(ext: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("opal_catalog_test_{nanos}.{ext}"))
    }

    #[test]
    fn resolves_names_case_insensitively() {
        let mut cat = Catalog::new();
        cat.register_table(TableDef {
            db: "test".to_string(),
            name: "Orders".to_string(),
            id: 0,
            columns: vec![col("id", DataType::Int64)],
        })
        .expect("register");

        let t = cat.table_by_name("TEST", "orders").expect("lookup");
        assert_eq!(t.id, 1);
        assert_eq!(t.columns[0].id, 1);
        assert!(cat.table_by_name("test", "missing").is_err());
    }

    #[test]
    fn pk_is_handle_requires_single_integer_pk() {
        let mut int_pk = col("id", DataType::Int64);
        int_pk.primary_key = true;
        let mut str_pk = col("code", DataType::Utf8);
        str_pk.primary_key = true;

        let t = TableDef {
            db: "test".to_string(),
            name: "a".to_string(),
            id: 1,
            columns: vec![int_pk.clone(), col("v", DataType::Utf8)],
        };
        assert!(t.pk_is_handle());

        let t = TableDef {
            db: "test".to_string(),
            name: "b".to_string(),
            id: 2,
            columns: vec![str_pk, col("v", DataType::Utf8)],
        };
        assert!(!t.pk_is_handle());

        let mut second_pk = col("other", DataType::Int64);
        second_pk.primary_key = true;
        let t = TableDef {
            db: "test".to_string(),
            name: "c".to_string(),
            id: 3,
            columns: vec![int_pk, second_pk],
        };
        assert!(!t.pk_is_handle());
    }

    #[test]
    fn write_only_columns_hidden_from_reads() {
        let mut adding = col("new_col", DataType::Int64);
        adding.state = ColumnState::WriteOnly;
        let t = TableDef {
            db: "test".to_string(),
            name: "t".to_string(),
            id: 1,
            columns: vec![col("a", DataType::Int64), adding],
        };
        assert_eq!(t.columns().count(), 1);
        assert_eq!(t.writable_columns().count(), 2);
    }

    #[test]
    fn loads_catalog_from_json() {
        let path = unique_path("json");
        let payload = r#"[{"db":"test","name":"t_json","columns":[{"name":"a","data_type":"Int64"}]}]"#;
        std::fs::write(&path, payload).expect("write json");

        let catalog = Catalog::load(path.to_str().expect("path utf8")).expect("load json");
        let table = catalog.table_by_name("test", "t_json").expect("table");
        assert_eq!(table.columns.len(), 1);
        assert_eq!(table.columns[0].data_type, DataType::Int64);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn loads_catalog_from_toml_wrapped_tables() {
        let path = unique_path("toml");
        let payload = r#"
            [[tables]]
            db = "test"
            name = "t_toml"

            [[tables.columns]]
            name = "a"
            data_type = "Int64"
            primary_key = true
        "#;
        std::fs::write(&path, payload).expect("write toml");

        let catalog = Catalog::load(path.to_str().expect("path utf8")).expect("load toml");
        let table = catalog.table_by_name("test", "t_toml").expect("table");
        assert!(table.pk_is_handle());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn rejects_table_without_database() {
        let mut cat = Catalog::new();
        let err = cat
            .register_table(TableDef {
                db: String::new(),
                name: "t".to_string(),
                id: 0,
                columns: vec![],
            })
            .expect_err("reject");
        assert_eq!(err.code(), "InvalidConfig");
    }
}
