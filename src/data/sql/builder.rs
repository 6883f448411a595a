//! 参数化语句构建
//!
//! 生成的参数统一命名为 `@p0`、`@p1`……；过滤子句的自定义参数不得占用该命名空间。

use super::{validate_ident, Dialect, SqlStatement, TableName};
use crate::data::value::{ColumnMap, ColumnValue, SqlValue};
use crate::data::{DataError, Result};

/// 变更队列表的列（领取语句返回的顺序）
pub const CHANGE_QUEUE_COLUMNS: [&str; 5] =
    ["TableName", "RecordId", "RecordId2", "FieldName", "NewValue"];

/// 调用方提供的过滤子句
///
/// 子句文本由调用方负责，值必须通过 `bind` 以命名参数传入。
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    clause: String,
    params: Vec<(String, SqlValue)>,
}

impl Filter {
    pub fn new(clause: impl Into<String>) -> Self {
        Self {
            clause: clause.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }
}

/// WHERE 条件
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    /// 无条件（仅 SELECT 允许）
    All,
    /// 按列等值匹配（主键）
    Keys(Vec<(String, SqlValue)>),
    /// 自定义过滤子句
    Filter(Filter),
}

/// 排序
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// 分页方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    All,
    /// 前 N 行
    Top(u64),
    /// 偏移分页（需要显式排序）
    Window { offset: u64, limit: u64 },
}

/// SELECT 查询描述
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    columns: Vec<String>,
    criteria: Criteria,
    order_by: Vec<OrderBy>,
    page: Page,
    for_update: bool,
}

impl Default for SelectQuery {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            criteria: Criteria::All,
            order_by: Vec::new(),
            page: Page::All,
            for_update: false,
        }
    }
}

impl SelectQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定列（为空时选择全部列）
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn keys(mut self, keys: Vec<(String, SqlValue)>) -> Self {
        self.criteria = Criteria::Keys(keys);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.criteria = Criteria::Filter(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending,
        });
        self
    }

    pub fn top(mut self, count: u64) -> Self {
        self.page = Page::Top(count);
        self
    }

    pub fn window(mut self, offset: u64, limit: u64) -> Self {
        self.page = Page::Window { offset, limit };
        self
    }

    /// 读取并锁定行（需在事务内执行）
    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }
}

/// 参数分配器
#[derive(Default)]
struct ParamBinder {
    params: Vec<(String, SqlValue)>,
    generated: usize,
}

impl ParamBinder {
    fn bind(&mut self, value: SqlValue) -> String {
        let name = format!("@p{}", self.generated);
        self.generated += 1;
        self.params.push((name.clone(), value));
        name
    }

    fn bind_named(&mut self, name: &str, value: SqlValue) -> Result<()> {
        let bare = name
            .strip_prefix('@')
            .ok_or_else(|| DataError::config(format!("过滤参数必须以 @ 开头: {}", name)))?;
        validate_ident(bare)?;
        if is_generated_name(bare) {
            return Err(DataError::config(format!(
                "过滤参数 {} 与自动生成的参数名冲突",
                name
            )));
        }
        if self.params.iter().any(|(n, _)| n == name) {
            return Err(DataError::config(format!("过滤参数重复: {}", name)));
        }
        self.params.push((name.to_string(), value));
        Ok(())
    }

    fn finish(self, sql: String) -> SqlStatement {
        SqlStatement {
            sql,
            params: self.params,
        }
    }
}

fn is_generated_name(bare: &str) -> bool {
    bare.strip_prefix('p')
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// 渲染列值：绑定值 → 参数；哨兵 → 存储端表达式；原始片段 → 原文
fn render_value(dialect: Dialect, binder: &mut ParamBinder, value: &ColumnValue) -> String {
    match value {
        ColumnValue::Bind(v) => binder.bind(v.clone()),
        ColumnValue::Now => dialect.now_expr().to_string(),
        ColumnValue::NewId => dialect.new_id_expr().to_string(),
        ColumnValue::Raw(raw) => raw.as_str().to_string(),
    }
}

fn render_where(
    dialect: Dialect,
    binder: &mut ParamBinder,
    criteria: &Criteria,
    allow_all: bool,
) -> Result<String> {
    match criteria {
        Criteria::All if allow_all => Ok(String::new()),
        Criteria::All => Err(DataError::config("不允许无条件的写操作")),
        Criteria::Keys(keys) if keys.is_empty() => {
            Err(DataError::config("WHERE 条件不能为空"))
        }
        Criteria::Keys(keys) => {
            let mut parts = Vec::with_capacity(keys.len());
            for (column, value) in keys {
                validate_ident(column)?;
                let placeholder = binder.bind(value.clone());
                parts.push(format!("{} = {}", dialect.quote_ident(column), placeholder));
            }
            Ok(format!(" WHERE {}", parts.join(" AND ")))
        }
        Criteria::Filter(filter) => {
            if filter.clause.trim().is_empty() {
                return Err(DataError::config("过滤子句不能为空"));
            }
            for (name, value) in &filter.params {
                binder.bind_named(name, value.clone())?;
            }
            Ok(format!(" WHERE ({})", filter.clause))
        }
    }
}

fn render_order_by(dialect: Dialect, order_by: &[OrderBy]) -> Result<String> {
    if order_by.is_empty() {
        return Ok(String::new());
    }
    let mut parts = Vec::with_capacity(order_by.len());
    for order in order_by {
        validate_ident(&order.column)?;
        let direction = if order.descending { "DESC" } else { "ASC" };
        parts.push(format!("{} {}", dialect.quote_ident(&order.column), direction));
    }
    Ok(format!(" ORDER BY {}", parts.join(", ")))
}

fn render_columns(dialect: Dialect, columns: &[String]) -> Result<String> {
    if columns.is_empty() {
        return Ok("*".to_string());
    }
    let mut quoted = Vec::with_capacity(columns.len());
    for column in columns {
        validate_ident(column)?;
        quoted.push(dialect.quote_ident(column));
    }
    Ok(quoted.join(", "))
}

/// 构建 SELECT
///
/// 分页：给出偏移时使用 OFFSET/FETCH 风格（必须显式排序），只限制行数时使用 TOP N 风格。
pub fn build_select(dialect: Dialect, table: &TableName, query: &SelectQuery) -> Result<SqlStatement> {
    if matches!(query.page, Page::Window { .. }) && query.order_by.is_empty() {
        return Err(DataError::config("偏移分页需要显式排序"));
    }

    let mut binder = ParamBinder::default();
    let columns = render_columns(dialect, &query.columns)?;
    let where_clause = render_where(dialect, &mut binder, &query.criteria, true)?;
    let order_clause = render_order_by(dialect, &query.order_by)?;
    let lock_hint = if query.for_update {
        dialect.row_lock_hint()
    } else {
        ""
    };
    let table = dialect.quote_table(table);

    let sql = match (dialect, query.page) {
        (Dialect::SqlServer, Page::Top(count)) => format!(
            "SELECT TOP ({}) {} FROM {}{}{}{}",
            count, columns, table, lock_hint, where_clause, order_clause
        ),
        (Dialect::SqlServer, Page::Window { offset, limit }) => format!(
            "SELECT {} FROM {}{}{}{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            columns, table, lock_hint, where_clause, order_clause, offset, limit
        ),
        (Dialect::Sqlite, Page::Top(count)) => format!(
            "SELECT {} FROM {}{}{} LIMIT {}",
            columns, table, where_clause, order_clause, count
        ),
        (Dialect::Sqlite, Page::Window { offset, limit }) => format!(
            "SELECT {} FROM {}{}{} LIMIT {} OFFSET {}",
            columns, table, where_clause, order_clause, limit, offset
        ),
        (_, Page::All) => format!(
            "SELECT {} FROM {}{}{}{}",
            columns, table, lock_hint, where_clause, order_clause
        ),
    };

    Ok(binder.finish(sql))
}

/// 构建 INSERT
///
/// - `output`: 需要在同一次往返中取回的存储端生成列
/// - `exclude`: 不写入的列（自增 id、guid 等）
pub fn build_insert(
    dialect: Dialect,
    table: &TableName,
    values: &ColumnMap,
    output: &[&str],
    exclude: &[&str],
) -> Result<SqlStatement> {
    let mut binder = ParamBinder::default();
    let mut columns = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());

    for (column, value) in values.iter() {
        if exclude.iter().any(|excluded| *excluded == column) {
            continue;
        }
        validate_ident(column)?;
        columns.push(dialect.quote_ident(column));
        placeholders.push(render_value(dialect, &mut binder, value));
    }

    if columns.is_empty() {
        return Err(DataError::config(format!("INSERT {} 的载荷为空", table)));
    }

    for column in output {
        validate_ident(column)?;
    }

    let table = dialect.quote_table(table);
    let columns = columns.join(", ");
    let placeholders = placeholders.join(", ");

    let sql = match (dialect, output.is_empty()) {
        (_, true) => format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table, columns, placeholders
        ),
        (Dialect::Sqlite, false) => format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table,
            columns,
            placeholders,
            output_list(dialect, "inserted", output)
        ),
        (Dialect::SqlServer, false) => format!(
            "INSERT INTO {} ({}) OUTPUT {} VALUES ({})",
            table,
            columns,
            output_list(dialect, "inserted", output),
            placeholders
        ),
    };

    Ok(binder.finish(sql))
}

fn output_list(dialect: Dialect, pseudo_table: &str, columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| dialect.output_column(pseudo_table, column))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 构建 UPDATE
///
/// `set_values` 与 `where_values` 均不能为空，不允许无条件修改。
pub fn build_update(
    dialect: Dialect,
    table: &TableName,
    set_values: &ColumnMap,
    where_values: &[(String, SqlValue)],
) -> Result<SqlStatement> {
    if set_values.is_empty() {
        return Err(DataError::config(format!("UPDATE {} 的 SET 为空", table)));
    }
    if where_values.is_empty() {
        return Err(DataError::config(format!("UPDATE {} 缺少 WHERE 条件", table)));
    }

    let mut binder = ParamBinder::default();
    let mut assignments = Vec::with_capacity(set_values.len());
    for (column, value) in set_values.iter() {
        validate_ident(column)?;
        let rendered = render_value(dialect, &mut binder, value);
        assignments.push(format!("{} = {}", dialect.quote_ident(column), rendered));
    }

    let where_clause = render_where(
        dialect,
        &mut binder,
        &Criteria::Keys(where_values.to_vec()),
        false,
    )?;

    let sql = format!(
        "UPDATE {} SET {}{}",
        dialect.quote_table(table),
        assignments.join(", "),
        where_clause
    );
    Ok(binder.finish(sql))
}

/// 构建自增 UPDATE：`SET field = COALESCE(field, 0) + @delta`
pub fn build_increment(
    dialect: Dialect,
    table: &TableName,
    field: &str,
    delta: SqlValue,
    where_values: &[(String, SqlValue)],
) -> Result<SqlStatement> {
    validate_ident(field)?;
    if !matches!(delta, SqlValue::Integer(_) | SqlValue::Real(_)) {
        return Err(DataError::config(format!(
            "{}.{} 的增量必须是数值: {}",
            table, field, delta
        )));
    }
    if where_values.is_empty() {
        return Err(DataError::config(format!("UPDATE {} 缺少 WHERE 条件", table)));
    }

    let mut binder = ParamBinder::default();
    let column = dialect.quote_ident(field);
    let placeholder = binder.bind(delta);
    let where_clause = render_where(
        dialect,
        &mut binder,
        &Criteria::Keys(where_values.to_vec()),
        false,
    )?;

    let sql = format!(
        "UPDATE {} SET {} = COALESCE({}, 0) + {}{}",
        dialect.quote_table(table),
        column,
        column,
        placeholder,
        where_clause
    );
    Ok(binder.finish(sql))
}

/// 构建 EXISTS 查询（返回 0/1 标量）
pub fn build_exists(dialect: Dialect, table: &TableName, criteria: &Criteria) -> Result<SqlStatement> {
    let mut binder = ParamBinder::default();
    let where_clause = render_where(dialect, &mut binder, criteria, true)?;
    let table = dialect.quote_table(table);

    let sql = match dialect {
        Dialect::Sqlite => format!("SELECT EXISTS(SELECT 1 FROM {}{})", table, where_clause),
        Dialect::SqlServer => format!(
            "SELECT CASE WHEN EXISTS(SELECT 1 FROM {}{}) THEN 1 ELSE 0 END",
            table, where_clause
        ),
    };
    Ok(binder.finish(sql))
}

/// 构建 DELETE（不允许无条件删除）
pub fn build_delete(dialect: Dialect, table: &TableName, criteria: &Criteria) -> Result<SqlStatement> {
    let mut binder = ParamBinder::default();
    let where_clause = render_where(dialect, &mut binder, criteria, false)?;
    let sql = format!("DELETE FROM {}{}", dialect.quote_table(table), where_clause);
    Ok(binder.finish(sql))
}

/// 构建变更队列领取语句：一条语句内删除至多 `batch_size` 条未处理行并返回其内容
pub fn build_claim_changes(dialect: Dialect, table: &TableName, batch_size: usize) -> Result<SqlStatement> {
    if batch_size == 0 {
        return Err(DataError::config("变更队列批量大小必须大于 0"));
    }

    let quoted = dialect.quote_table(table);
    let processed = dialect.quote_ident("IsProcessed");
    let output = output_list(dialect, "deleted", &CHANGE_QUEUE_COLUMNS);

    let sql = match dialect {
        Dialect::Sqlite => format!(
            "DELETE FROM {t} WHERE rowid IN (SELECT rowid FROM {t} WHERE {p} = 0 ORDER BY rowid LIMIT {n}) RETURNING {o}",
            t = quoted,
            p = processed,
            n = batch_size,
            o = output
        ),
        Dialect::SqlServer => format!(
            "DELETE TOP ({n}) FROM {t} WITH (READPAST, ROWLOCK) OUTPUT {o} WHERE {p} = 0",
            n = batch_size,
            t = quoted,
            o = output,
            p = processed
        ),
    };
    Ok(SqlStatement::new(sql))
}
