//! Request and compiled-statement types.

use serde::{Deserialize, Serialize};

/// A literal operand in a filter.
///
/// Values are always bound as parameters, never rendered into SQL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON null. Only meaningful as the operand of nothing; use `is_null`.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
    /// List of values, used by `in` / `not_in`.
    List(Vec<Value>),
}

impl Value {
    /// Converts a JSON value, returning `None` for objects.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        Some(match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64()?),
            },
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => Self::List(
                items
                    .iter()
                    .map(Self::from_json)
                    .collect::<Option<Vec<_>>>()?,
            ),
            serde_json::Value::Object(_) => return None,
        })
    }

    /// Short name of the value's kind, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(fl) => write!(f, "{fl}"),
            Self::String(s) => write!(f, "'{s}'"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// Leaf comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Equal (=)
    Eq,
    /// Not equal (!=)
    Ne,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Gte,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Lte,
    /// Membership in a list
    In,
    /// Non-membership in a list
    NotIn,
    /// Case-sensitive pattern match
    Like,
    /// Case-insensitive pattern match
    Ilike,
    /// Null test; the operand selects IS NULL (true) or IS NOT NULL (false)
    IsNull,
}

impl FilterOp {
    /// Every supported operator, in documentation order.
    pub const ALL: [Self; 11] = [
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::In,
        Self::NotIn,
        Self::Like,
        Self::Ilike,
        Self::IsNull,
    ];

    /// The operator's input name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Like => "like",
            Self::Ilike => "ilike",
            Self::IsNull => "is_null",
        }
    }

    /// Parses an operator input name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }

    /// SQL operator text placed between the column and the placeholder.
    ///
    /// `IsNull` has no placeholder and is rendered by the compiler.
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Like => "LIKE",
            Self::Ilike => "ILIKE",
            Self::IsNull => "IS NULL",
        }
    }
}

impl std::fmt::Display for FilterOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical connectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalKind {
    /// All children must hold.
    And,
    /// At least one child must hold.
    Or,
    /// Negates exactly one child.
    Not,
}

impl std::fmt::Display for LogicalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Not => write!(f, "NOT"),
        }
    }
}

/// A node of a filter expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterNode {
    /// A single column comparison.
    Comparison {
        /// Column name.
        column: String,
        /// Operator.
        operator: FilterOp,
        /// Operand.
        value: Value,
    },
    /// A logical combination of child nodes.
    Logical {
        /// Connective.
        kind: LogicalKind,
        /// Child nodes.
        children: Vec<FilterNode>,
    },
}

impl FilterNode {
    /// Creates a comparison leaf.
    pub fn compare(column: impl Into<String>, operator: FilterOp, value: impl Into<Value>) -> Self {
        Self::Comparison {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    /// Shorthand for an equality comparison.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, FilterOp::Eq, value)
    }

    /// Creates an AND group.
    #[must_use]
    pub fn and(children: Vec<FilterNode>) -> Self {
        Self::Logical {
            kind: LogicalKind::And,
            children,
        }
    }

    /// Creates an OR group.
    #[must_use]
    pub fn or(children: Vec<FilterNode>) -> Self {
        Self::Logical {
            kind: LogicalKind::Or,
            children,
        }
    }

    /// Negates a node.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(child: FilterNode) -> Self {
        Self::Logical {
            kind: LogicalKind::Not,
            children: vec![child],
        }
    }

    /// Number of comparison leaves in the tree.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Comparison { .. } => 1,
            Self::Logical { children, .. } => children.iter().map(Self::leaf_count).sum(),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asc => write!(f, "ASC"),
            Self::Desc => write!(f, "DESC"),
        }
    }
}

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Column or aggregate alias to sort by.
    pub column: String,
    /// Direction.
    #[serde(default)]
    pub order: SortOrder,
}

impl OrderBy {
    /// Ascending order on `column`.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            order: SortOrder::Asc,
        }
    }

    /// Descending order on `column`.
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Shape of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// At most one row.
    Single,
    /// A page of rows.
    List,
    /// Grouped aggregation.
    Aggregate,
}

impl OperationKind {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::List => "list",
            Self::Aggregate => "aggregate",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate functions available to aggregate requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    /// Sum of values.
    Sum,
    /// Arithmetic mean.
    Avg,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Count of non-null values.
    Count,
}

impl AggregateFunction {
    /// Functions emitted for a numeric column when no aggregation is requested.
    pub const NUMERIC_DEFAULTS: [Self; 4] = [Self::Sum, Self::Avg, Self::Min, Self::Max];

    /// Lowercase function name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }

    /// Returns true if the function only makes sense on numeric columns.
    #[must_use]
    pub const fn requires_numeric(self) -> bool {
        matches!(self, Self::Sum | Self::Avg)
    }

    /// Output alias for this function applied to `column`.
    #[must_use]
    pub fn alias(self, column: &str) -> String {
        format!("{}_{column}", self.as_str())
    }
}

/// Aggregations requested for one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Source column.
    pub column: String,
    /// Functions to apply.
    pub functions: Vec<AggregateFunction>,
}

impl Aggregation {
    /// Creates an aggregation entry.
    pub fn new(column: impl Into<String>, functions: Vec<AggregateFunction>) -> Self {
        Self {
            column: column.into(),
            functions,
        }
    }
}

/// A validated, per-operation request descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Target table.
    pub table: String,
    /// Operation kind.
    pub operation: OperationKind,
    /// Selected fields; empty means every column.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Optional filter root.
    #[serde(default)]
    pub filter: Option<FilterNode>,
    /// Group-by columns (aggregate only).
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Requested aggregations (aggregate only).
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    /// Filter over the aggregated output (aggregate only).
    #[serde(default)]
    pub having: Option<FilterNode>,
    /// Explicit ordering.
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    /// Row limit.
    #[serde(default)]
    pub limit: Option<u64>,
    /// Row offset.
    #[serde(default)]
    pub offset: Option<u64>,
}

impl QueryRequest {
    fn new(table: impl Into<String>, operation: OperationKind) -> Self {
        Self {
            table: table.into(),
            operation,
            fields: Vec::new(),
            filter: None,
            group_by: Vec::new(),
            aggregations: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// A list request over `table`.
    pub fn list(table: impl Into<String>) -> Self {
        Self::new(table, OperationKind::List)
    }

    /// A single-row request over `table`.
    pub fn single(table: impl Into<String>) -> Self {
        Self::new(table, OperationKind::Single)
    }

    /// An aggregate request over `table` grouped by `group_by`.
    pub fn aggregate<S: Into<String>>(table: impl Into<String>, group_by: Vec<S>) -> Self {
        let mut request = Self::new(table, OperationKind::Aggregate);
        request.group_by = group_by.into_iter().map(Into::into).collect();
        request
    }

    /// Sets the projected fields.
    #[must_use]
    pub fn with_fields<S: Into<String>>(mut self, fields: Vec<S>) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the filter root.
    #[must_use]
    pub fn with_filter(mut self, filter: FilterNode) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Adds an aggregation.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    /// Sets the having filter.
    #[must_use]
    pub fn with_having(mut self, having: FilterNode) -> Self {
        self.having = Some(having);
        self
    }

    /// Appends an ORDER BY entry.
    #[must_use]
    pub fn with_order(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Sets the limit.
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the offset.
    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// The output of compilation: parameterized SQL ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Positional parameters, one per placeholder.
    pub params: Vec<Value>,
    /// Target table.
    pub table: String,
    /// Operation kind.
    pub operation: OperationKind,
}

impl CompiledQuery {
    /// Number of `?` placeholders in the SQL text.
    ///
    /// Identifiers are either bare or backtick-quoted and values never
    /// appear inline, so every `?` outside backticks is a placeholder.
    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        let mut quoted = false;
        let mut count = 0;
        for c in self.sql.chars() {
            match c {
                '`' => quoted = !quoted,
                '?' if !quoted => count += 1,
                _ => {}
            }
        }
        count
    }
}

impl std::fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}
