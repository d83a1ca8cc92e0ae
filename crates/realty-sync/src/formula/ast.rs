use std::fmt;

/// A reference to caller-supplied data. `segments[0]` is the top-level key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub segments: Vec<String>,
}

impl FieldPath {
    pub fn dotted(name: &str) -> Self {
        Self {
            segments: name.split('.').map(str::to_string).collect(),
        }
    }

    pub fn single(name: &str) -> Self {
        Self {
            segments: vec![name.to_string()],
        }
    }

    pub fn root(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or_default()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Concat,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sum,
    Count,
    If,
    Round,
    Min,
    Max,
    Abs,
    Coalesce,
}

impl Function {
    pub fn lookup(name: &str) -> Option<Self> {
        let function = match name.to_ascii_uppercase().as_str() {
            "SUM" => Self::Sum,
            "COUNT" => Self::Count,
            "IF" => Self::If,
            "ROUND" => Self::Round,
            "MIN" => Self::Min,
            "MAX" => Self::Max,
            "ABS" => Self::Abs,
            "COALESCE" => Self::Coalesce,
            _ => return None,
        };
        Some(function)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Count => "COUNT",
            Self::If => "IF",
            Self::Round => "ROUND",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Abs => "ABS",
            Self::Coalesce => "COALESCE",
        }
    }

    /// Accepted argument counts, `max = None` meaning variadic.
    pub(crate) fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::Sum | Self::Count | Self::Abs => (1, Some(1)),
            Self::If => (3, Some(3)),
            Self::Round => (1, Some(2)),
            Self::Min | Self::Max | Self::Coalesce => (1, None),
        }
    }

    /// Aggregates take a path into a repeating structure instead of a value.
    pub(crate) fn takes_path(self) -> bool {
        matches!(self, Self::Sum | Self::Count)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
    Field(FieldPath),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Top-level field names in first-seen order, without duplicates.
    pub fn field_roots(&self) -> Vec<String> {
        let mut roots = Vec::new();
        self.collect_roots(&mut roots);
        roots
    }

    fn collect_roots(&self, roots: &mut Vec<String>) {
        match self {
            Expr::Field(path) => {
                if !roots.iter().any(|seen| seen == path.root()) {
                    roots.push(path.root().to_string());
                }
            }
            Expr::Unary { operand, .. } => operand.collect_roots(roots),
            Expr::Binary { left, right, .. } => {
                left.collect_roots(roots);
                right.collect_roots(roots);
            }
            Expr::Call { args, .. } => args.iter().for_each(|arg| arg.collect_roots(roots)),
            Expr::Number(_) | Expr::Text(_) | Expr::Bool(_) | Expr::Null => {}
        }
    }
}
