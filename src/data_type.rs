use serde::{Deserialize, Serialize};

/// Element type of an array dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Structured element made of named fields.
    Compound(Vec<(String, ElementType)>),
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn itemsize(&self) -> u64 {
        match self {
            ElementType::Bool | ElementType::Int8 | ElementType::UInt8 => 1,
            ElementType::Int16 | ElementType::UInt16 => 2,
            ElementType::Int32 | ElementType::UInt32 | ElementType::Float32 => 4,
            ElementType::Int64 | ElementType::UInt64 | ElementType::Float64 => 8,
            ElementType::Compound(fields) => fields.iter().map(|(_, t)| t.itemsize()).sum(),
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, ElementType::Compound(_))
    }

    /// Parse an N5 `dataType` string.
    pub fn from_n5_name(name: &str) -> crate::Result<Self> {
        let out = match name {
            "uint8" => ElementType::UInt8,
            "int8" => ElementType::Int8,
            "int16" => ElementType::Int16,
            "uint16" => ElementType::UInt16,
            "int32" => ElementType::Int32,
            "uint32" => ElementType::UInt32,
            "int64" => ElementType::Int64,
            "uint64" => ElementType::UInt64,
            "float32" => ElementType::Float32,
            "float64" => ElementType::Float64,
            s => return Err(crate::Error::invalid_tree(format!("unsupported data type: {s}"))),
        };
        Ok(out)
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementType::Bool => f.write_str("bool"),
            ElementType::Int8 => f.write_str("int8"),
            ElementType::Int16 => f.write_str("int16"),
            ElementType::Int32 => f.write_str("int32"),
            ElementType::Int64 => f.write_str("int64"),
            ElementType::UInt8 => f.write_str("uint8"),
            ElementType::UInt16 => f.write_str("uint16"),
            ElementType::UInt32 => f.write_str("uint32"),
            ElementType::UInt64 => f.write_str("uint64"),
            ElementType::Float32 => f.write_str("float32"),
            ElementType::Float64 => f.write_str("float64"),
            ElementType::Compound(fields) => {
                f.write_str("{")?;
                for (idx, (name, t)) in fields.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {t}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// A Rust primitive that can be held in an array source.
pub trait NativeElement: Copy + Default + Send + Sync + 'static {
    const ELEMENT_TYPE: ElementType;
}

macro_rules! impl_native_element {
    ($($t:ty => $v:ident),* $(,)?) => {
        $(
            impl NativeElement for $t {
                const ELEMENT_TYPE: ElementType = ElementType::$v;
            }
        )*
    };
}

impl_native_element!(
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
);
