//=====================================================
// File: types/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript datatype model
// Objective: Define primitive and named datatypes, the numeric promotion
//            order and the operator validity table used by the resolver
//=====================================================

use std::fmt;

use crate::ast::NodeType;

//=====================================================
// Section 1.0 - Primitives
//=====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Char,
    Int,
    Long,
    Float,
    Double,
    String,
    Void,
    Null,
}

impl Primitive {
    pub const ALL: [Primitive; 9] = [
        Primitive::Bool,
        Primitive::Char,
        Primitive::Int,
        Primitive::Long,
        Primitive::Float,
        Primitive::Double,
        Primitive::String,
        Primitive::Void,
        Primitive::Null,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Char => "char",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
            Primitive::String => "string",
            Primitive::Void => "void",
            Primitive::Null => "null",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|primitive| primitive.name() == name)
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Primitive::Int | Primitive::Long | Primitive::Float | Primitive::Double
        )
    }

    pub fn is_integral(self) -> bool {
        matches!(self, Primitive::Int | Primitive::Long)
    }

    /// Position in the "heavier" order. Numeric promotion follows
    /// int < long < float < double; string outweighs every other value type.
    pub fn weight(self) -> Option<u8> {
        match self {
            Primitive::Bool => Some(0),
            Primitive::Char => Some(1),
            Primitive::Int => Some(2),
            Primitive::Long => Some(3),
            Primitive::Float => Some(4),
            Primitive::Double => Some(5),
            Primitive::String => Some(6),
            Primitive::Void | Primitive::Null => None,
        }
    }
}

//=====================================================
// Section 2.0 - Datatype
//=====================================================

/// A primitive or a reference to a declared enum/struct by qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Datatype {
    Primitive(Primitive),
    Enum(String),
    Struct(String),
}

impl Datatype {
    pub const BOOL: Datatype = Datatype::Primitive(Primitive::Bool);
    pub const CHAR: Datatype = Datatype::Primitive(Primitive::Char);
    pub const INT: Datatype = Datatype::Primitive(Primitive::Int);
    pub const LONG: Datatype = Datatype::Primitive(Primitive::Long);
    pub const FLOAT: Datatype = Datatype::Primitive(Primitive::Float);
    pub const DOUBLE: Datatype = Datatype::Primitive(Primitive::Double);
    pub const STRING: Datatype = Datatype::Primitive(Primitive::String);
    pub const VOID: Datatype = Datatype::Primitive(Primitive::Void);
    pub const NULL: Datatype = Datatype::Primitive(Primitive::Null);

    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            Datatype::Primitive(primitive) => Some(*primitive),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.primitive().is_some_and(Primitive::is_numeric)
    }

    pub fn is_integral(&self) -> bool {
        self.primitive().is_some_and(Primitive::is_integral)
    }

    pub fn is_void(&self) -> bool {
        *self == Datatype::VOID
    }

    pub fn is_enum(&self) -> bool {
        matches!(self, Datatype::Enum(_))
    }

    /// Types that can be stored in a variable slot at runtime.
    pub fn is_value_type(&self) -> bool {
        match self {
            Datatype::Primitive(primitive) => primitive.weight().is_some(),
            Datatype::Enum(_) => true,
            Datatype::Struct(_) => false,
        }
    }

    fn weight(&self) -> Option<u8> {
        self.primitive().and_then(Primitive::weight)
    }

    /// The heavier of two types; non-primitive operands keep `self`.
    pub fn heavier(&self, other: &Datatype) -> Datatype {
        match (self.weight(), other.weight()) {
            (Some(left), Some(right)) if right > left => other.clone(),
            _ => self.clone(),
        }
    }

    /// Implicit numeric widening, e.g. `int` into `long`.
    pub fn can_widen_to(&self, target: &Datatype) -> bool {
        self.is_numeric()
            && target.is_numeric()
            && self.weight() < target.weight()
    }

    pub fn is_assignable_to(&self, target: &Datatype) -> bool {
        self == target || self.can_widen_to(target)
    }

    //Function: binary_result
    //Purpose: Decide whether `self <op> rhs` is valid and what it yields
    //Inputs: op: operator node kind, rhs: right operand type
    //Returns: Option<Datatype> (None when the operator is invalid)
    pub fn binary_result(&self, op: NodeType, rhs: &Datatype) -> Option<Datatype> {
        use NodeType::*;
        let both_numeric = self.is_numeric() && rhs.is_numeric();
        let both_integral = self.is_integral() && rhs.is_integral();
        let both_bool = *self == Datatype::BOOL && *rhs == Datatype::BOOL;
        match op {
            Add => {
                if both_numeric {
                    Some(self.heavier(rhs))
                } else if (*self == Datatype::STRING && rhs.is_value_type())
                    || (*rhs == Datatype::STRING && self.is_value_type())
                {
                    Some(Datatype::STRING)
                } else {
                    None
                }
            }
            Subtract | Multiply | Divide | Modulo => both_numeric.then(|| self.heavier(rhs)),
            ShiftLeft | ShiftRight => both_integral.then(|| self.heavier(rhs)),
            BitAnd | BitXor | BitOr => {
                if both_integral {
                    Some(self.heavier(rhs))
                } else if both_bool {
                    Some(Datatype::BOOL)
                } else {
                    None
                }
            }
            LogicalAnd | LogicalOr => both_bool.then_some(Datatype::BOOL),
            Less | Greater | LessEqual | GreaterEqual => {
                let chars = *self == Datatype::CHAR && *rhs == Datatype::CHAR;
                (both_numeric || chars).then_some(Datatype::BOOL)
            }
            Equal | NotEqual => {
                let same_kind = self == rhs && self.is_value_type();
                (both_numeric || same_kind).then_some(Datatype::BOOL)
            }
            _ => None,
        }
    }

    /// Unary `+`/`-` need a numeric operand, `!` a bool.
    pub fn unary_result(&self, op: NodeType) -> Option<Datatype> {
        match op {
            NodeType::Negate | NodeType::Positive => self.is_numeric().then(|| self.clone()),
            NodeType::Not => (*self == Datatype::BOOL).then_some(Datatype::BOOL),
            _ => None,
        }
    }

    /// Explicit `(type) expr` conversions.
    pub fn can_cast_to(&self, target: &Datatype) -> bool {
        if self == target {
            return true;
        }
        if self.is_numeric() && target.is_numeric() {
            return true;
        }
        let integral_char = (*self == Datatype::CHAR && target.is_integral())
            || (self.is_integral() && *target == Datatype::CHAR);
        if integral_char {
            return true;
        }
        if self.is_enum() && *target == Datatype::INT {
            return true;
        }
        *target == Datatype::STRING && self.is_value_type()
    }

    /// Name as written in source and in signature strings.
    pub fn name(&self) -> &str {
        match self {
            Datatype::Primitive(primitive) => primitive.name(),
            Datatype::Enum(name) | Datatype::Struct(name) => name,
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Primitive> for Datatype {
    fn from(value: Primitive) -> Self {
        Datatype::Primitive(value)
    }
}

//=====================================================
// Section 3.0 - Signatures
//=====================================================

/// Render `<qualified>(<t1>|<t2>)<ret>`, the form shared by overload keys,
/// intern function headers and native linkage strings.
pub fn signature(qualified_name: &str, params: &[Datatype], return_type: &Datatype) -> String {
    let params = params
        .iter()
        .map(Datatype::name)
        .collect::<Vec<_>>()
        .join("|");
    format!("{qualified_name}({params}){}", return_type.name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_promotion_picks_heavier_type() {
        let order = [Datatype::INT, Datatype::LONG, Datatype::FLOAT, Datatype::DOUBLE];
        for (i, left) in order.iter().enumerate() {
            for (j, right) in order.iter().enumerate() {
                let expected = &order[i.max(j)];
                assert_eq!(
                    left.binary_result(NodeType::Add, right).as_ref(),
                    Some(expected),
                    "{left} + {right}"
                );
                assert_eq!(
                    left.binary_result(NodeType::Less, right),
                    Some(Datatype::BOOL)
                );
            }
        }
    }

    #[test]
    fn string_concatenation_accepts_any_value() {
        assert_eq!(
            Datatype::STRING.binary_result(NodeType::Add, &Datatype::INT),
            Some(Datatype::STRING)
        );
        assert_eq!(
            Datatype::CHAR.binary_result(NodeType::Add, &Datatype::STRING),
            Some(Datatype::STRING)
        );
        assert_eq!(Datatype::STRING.binary_result(NodeType::Subtract, &Datatype::INT), None);
    }

    #[test]
    fn bitwise_operators_reject_floating_point() {
        assert_eq!(Datatype::DOUBLE.binary_result(NodeType::BitAnd, &Datatype::INT), None);
        assert_eq!(
            Datatype::BOOL.binary_result(NodeType::BitXor, &Datatype::BOOL),
            Some(Datatype::BOOL)
        );
    }

    #[test]
    fn signature_uses_pipe_separated_types() {
        let rendered = signature("org.x.Y.z", &[Datatype::INT, Datatype::STRING], &Datatype::VOID);
        assert_eq!(rendered, "org.x.Y.z(int|string)void");
    }
}

//=====================================================
// End of file
//=====================================================
