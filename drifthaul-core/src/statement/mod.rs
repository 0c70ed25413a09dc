//! Parameterized SQL for the write and read operations.

pub mod bind;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::TableMetadata;
use crate::dialect::Dialect;
use crate::error::{CoreError, Result};
use crate::types::{ColumnMeta, SemanticType};

pub use self::bind::{untyped_value, ParameterBinder};

/// Which columns an `INSERT` binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// Only columns present in the input document.
    SuppliedOnly,
    /// Every table column; absent ones take cached defaults or NULL.
    AllColumns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = "LIKE", alias = "like")]
    Like,
}

impl FilterOp {
    pub fn parse(token: &str) -> Result<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "=" | "==" | "EQ" => Ok(FilterOp::Eq),
            "!=" | "<>" | "NE" => Ok(FilterOp::NotEq),
            ">" | "GT" => Ok(FilterOp::Gt),
            "<" | "LT" => Ok(FilterOp::Lt),
            ">=" | "GE" => Ok(FilterOp::GtEq),
            "<=" | "LE" => Ok(FilterOp::LtEq),
            "LIKE" => Ok(FilterOp::Like),
            other => Err(CoreError::Validation(format!("unsupported filter operator: {other}"))),
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::NotEq => "!=",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::GtEq => ">=",
            FilterOp::LtEq => "<=",
            FilterOp::Like => "LIKE",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// One `(property, operator, argument)` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub property: String,
    pub op: FilterOp,
    pub argument: serde_json::Value,
}

impl Filter {
    pub fn new(property: impl Into<String>, op: FilterOp, argument: serde_json::Value) -> Self {
        Self {
            property: property.into(),
            op,
            argument,
        }
    }
}

/// `ORDER BY` entry, parsed from `col` or `col DESC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

impl SortKey {
    pub fn parse(spec: &str) -> Self {
        let trimmed = spec.trim();
        let upper = trimmed.to_ascii_uppercase();
        if let Some(column) = upper.strip_suffix(" DESC").map(|_| &trimmed[..trimmed.len() - 5]) {
            return Self {
                column: column.trim().to_string(),
                descending: true,
            };
        }
        if let Some(column) = upper.strip_suffix(" ASC").map(|_| &trimmed[..trimmed.len() - 4]) {
            return Self {
                column: column.trim().to_string(),
                descending: false,
            };
        }
        Self {
            column: trimmed.to_string(),
            descending: false,
        }
    }
}

/// Row selection of an UPDATE, DELETE or SELECT.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All,
    /// Equality on each key column, emitted in sorted column order.
    Keys(Vec<String>),
    /// Conditions emitted in the given order.
    Filters(Vec<Filter>),
}

/// A bind position: the column it targets and the type that selects its
/// binding routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindSlot {
    pub column: String,
    pub semantic_type: SemanticType,
}

/// SQL text plus its ordered bind slots.
///
/// For [`Predicate::Filters`] the WHERE slots follow the filter order, one per
/// filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltStatement {
    pub sql: String,
    pub slots: Vec<BindSlot>,
}

pub struct StatementBuilder<'a> {
    dialect: Dialect,
    table: String,
    metadata: &'a TableMetadata,
}

impl<'a> StatementBuilder<'a> {
    /// `table` is the already qualified and quoted target name.
    pub fn new(dialect: Dialect, table: impl Into<String>, metadata: &'a TableMetadata) -> Self {
        Self {
            dialect,
            table: table.into(),
            metadata,
        }
    }

    fn resolve(&self, name: &str) -> Result<&'a ColumnMeta> {
        self.metadata.column(name).ok_or_else(|| {
            CoreError::Validation(format!("unknown column {name} in table {}", self.table))
        })
    }

    fn resolve_sorted(&self, names: &[String]) -> Result<Vec<&'a ColumnMeta>> {
        let mut columns = names
            .iter()
            .map(|name| self.resolve(name))
            .collect::<Result<Vec<_>>>()?;
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        columns.dedup_by(|a, b| a.name == b.name);
        Ok(columns)
    }

    fn slot(column: &ColumnMeta) -> BindSlot {
        BindSlot {
            column: column.name.clone(),
            semantic_type: column.semantic_type,
        }
    }

    /// Columns an insert binds, in table order.
    pub fn insert_columns(&self, supplied: &[String], mode: BindMode) -> Result<Vec<&'a ColumnMeta>> {
        let resolved = supplied
            .iter()
            .map(|name| self.resolve(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(match mode {
            BindMode::AllColumns => self.metadata.columns.iter().collect(),
            BindMode::SuppliedOnly => self
                .metadata
                .columns
                .iter()
                .filter(|c| resolved.iter().any(|r| r.name == c.name))
                .collect(),
        })
    }

    pub fn build_insert(&self, supplied: &[String], mode: BindMode) -> Result<BuiltStatement> {
        let columns = self.insert_columns(supplied, mode)?;
        if columns.is_empty() {
            return Err(CoreError::Build(format!(
                "no columns to insert into {}",
                self.table
            )));
        }
        let names = columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
        let placeholders = columns
            .iter()
            .map(|c| self.dialect.placeholder(c.semantic_type))
            .collect::<Vec<_>>();
        Ok(BuiltStatement {
            sql: self.dialect.insert_row(&self.table, &names, &placeholders),
            slots: columns.into_iter().map(Self::slot).collect(),
        })
    }

    /// `UPDATE ... SET` every supplied non-key column, matched on `keys`.
    pub fn build_update(&self, supplied: &[String], keys: &[String]) -> Result<BuiltStatement> {
        let key_columns = self.resolve_sorted(keys)?;
        let set_columns = self
            .resolve_sorted(supplied)?
            .into_iter()
            .filter(|c| !key_columns.iter().any(|k| k.name == c.name))
            .collect::<Vec<_>>();
        if set_columns.is_empty() {
            return Err(CoreError::Build(format!(
                "update of {} sets no columns",
                self.table
            )));
        }

        let assignments = set_columns
            .iter()
            .map(|c| {
                format!(
                    "{} = {}",
                    self.dialect.quote_identifier(&c.name),
                    self.dialect.placeholder(c.semantic_type)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let mut slots = set_columns.into_iter().map(Self::slot).collect::<Vec<_>>();
        let mut sql = format!("UPDATE {} SET {}", self.table, assignments);
        self.push_where(&mut sql, &mut slots, &Predicate::Keys(keys.to_vec()))?;
        Ok(BuiltStatement { sql, slots })
    }

    pub fn build_delete(&self, predicate: &Predicate) -> Result<BuiltStatement> {
        let mut sql = format!("DELETE FROM {}", self.table);
        let mut slots = Vec::new();
        self.push_where(&mut sql, &mut slots, predicate)?;
        Ok(BuiltStatement { sql, slots })
    }

    pub fn build_select(
        &self,
        projection: Option<&[String]>,
        predicate: &Predicate,
        order_by: &[SortKey],
    ) -> Result<BuiltStatement> {
        let select_list = match projection {
            Some(columns) if !columns.is_empty() => columns
                .iter()
                .map(|name| self.resolve(name).map(|c| self.dialect.quote_identifier(&c.name)))
                .collect::<Result<Vec<_>>>()?
                .join(", "),
            _ => "*".to_string(),
        };
        let mut sql = format!("SELECT {} FROM {}", select_list, self.table);
        let mut slots = Vec::new();
        self.push_where(&mut sql, &mut slots, predicate)?;
        if !order_by.is_empty() {
            let keys = order_by
                .iter()
                .map(|key| -> Result<String> {
                    let column = self.resolve(&key.column)?;
                    let direction = if key.descending { " DESC" } else { "" };
                    Ok(format!("{}{}", self.dialect.quote_identifier(&column.name), direction))
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }
        Ok(BuiltStatement { sql, slots })
    }

    /// WHERE clause with literals inlined, for statements that cannot take
    /// bind parameters such as the subquery of a COPY. Empty for
    /// [`Predicate::All`].
    pub fn inline_where(&self, predicate: &Predicate, binder: &ParameterBinder) -> Result<String> {
        let filters = match predicate {
            Predicate::All => return Ok(String::new()),
            Predicate::Filters(filters) => filters,
            Predicate::Keys(_) => {
                return Err(CoreError::Build(
                    "key predicates carry no values to inline".to_string(),
                ))
            }
        };
        let conditions = filters
            .iter()
            .map(|filter| -> Result<String> {
                let column = self.resolve(&filter.property)?;
                let semantic_type = match filter.op {
                    FilterOp::Like => SemanticType::Varchar,
                    _ => column.semantic_type,
                };
                let value = binder.bind_json(semantic_type, &filter.argument)?;
                Ok(format!(
                    "{} {} {}",
                    self.dialect.quote_identifier(&column.name),
                    filter.op,
                    self.dialect.render_literal(&value)
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        if conditions.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(" WHERE {}", conditions.join(" AND ")))
    }

    fn push_where(&self, sql: &mut String, slots: &mut Vec<BindSlot>, predicate: &Predicate) -> Result<()> {
        let conditions = match predicate {
            Predicate::All => return Ok(()),
            Predicate::Keys(keys) => {
                let columns = self.resolve_sorted(keys)?;
                if columns.is_empty() {
                    return Err(CoreError::Build(format!(
                        "no key columns for {}",
                        self.table
                    )));
                }
                columns
                    .into_iter()
                    .map(|c| {
                        slots.push(Self::slot(c));
                        format!("{} = ?", self.dialect.quote_identifier(&c.name))
                    })
                    .collect::<Vec<_>>()
            }
            Predicate::Filters(filters) => filters
                .iter()
                .map(|filter| -> Result<String> {
                    let column = self.resolve(&filter.property)?;
                    let semantic_type = match filter.op {
                        FilterOp::Like => SemanticType::Varchar,
                        _ => column.semantic_type,
                    };
                    slots.push(BindSlot {
                        column: column.name.clone(),
                        semantic_type,
                    });
                    Ok(format!(
                        "{} {} ?",
                        self.dialect.quote_identifier(&column.name),
                        filter.op
                    ))
                })
                .collect::<Result<Vec<_>>>()?,
        };
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        Ok(())
    }
}
