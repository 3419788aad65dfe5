use std::fmt;

/// Kind of value following a [`Literal::TagValue`]
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum LiteralTag {
    Integer,
    BuiltinTypeIndex,
    LiteralArray,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum Literal {
    TagValue(LiteralTag),
    Integer(i32),
    BuiltinTypeIndex(u8),

    /// Key of another literal array
    LiteralArray(String),
}

/// Entry in the module literal table
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct LiteralArray(pub Vec<Literal>);

/// Type of an argument or instruction result
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum TypeRef {
    Builtin(u8),

    /// User type, described by another literal array
    Literal(String),
}

/// Key of a type annotation
///
/// Negative orders are arguments (`-1` is the first one), other orders are positions in the
/// instruction stream, not counting labels.
pub type TypeOrder = i32;

pub fn argument_order(arg: u16) -> TypeOrder {
    -(arg as i32) - 1
}

/// Argument named by a negative order
pub fn order_argument(order: TypeOrder) -> Option<u16> {
    if order < 0 {
        u16::try_from(-(order + 1)).ok()
    } else {
        None
    }
}

impl LiteralArray {
    /// Decode a type annotation
    ///
    /// The array is a flat sequence of `[tag, order, tag, type]` quadruples.
    pub fn to_type_annotation(&self) -> Result<Vec<(TypeOrder, TypeRef)>, MalformedAnnotation> {
        let literals = &self.0;
        if literals.len() % 4 != 0 {
            return Err(MalformedAnnotation { position: literals.len() });
        }

        let mut annotation = vec![];
        for (idx, chunk) in literals.chunks(4).enumerate() {
            let position = idx * 4;
            let order = match (&chunk[0], &chunk[1]) {
                (Literal::TagValue(LiteralTag::Integer), Literal::Integer(order)) => *order,
                _ => return Err(MalformedAnnotation { position }),
            };
            let typ = match (&chunk[2], &chunk[3]) {
                (Literal::TagValue(LiteralTag::BuiltinTypeIndex), Literal::BuiltinTypeIndex(b)) => {
                    TypeRef::Builtin(*b)
                }
                (Literal::TagValue(LiteralTag::LiteralArray), Literal::LiteralArray(key)) => {
                    TypeRef::Literal(key.clone())
                }
                _ => return Err(MalformedAnnotation { position: position + 2 }),
            };
            annotation.push((order, typ));
        }

        Ok(annotation)
    }

    pub fn from_type_annotation(annotation: &[(TypeOrder, TypeRef)]) -> LiteralArray {
        let mut literals = Vec::with_capacity(annotation.len() * 4);
        for (order, typ) in annotation {
            literals.push(Literal::TagValue(LiteralTag::Integer));
            literals.push(Literal::Integer(*order));
            match typ {
                TypeRef::Builtin(b) => {
                    literals.push(Literal::TagValue(LiteralTag::BuiltinTypeIndex));
                    literals.push(Literal::BuiltinTypeIndex(*b));
                }
                TypeRef::Literal(key) => {
                    literals.push(Literal::TagValue(LiteralTag::LiteralArray));
                    literals.push(Literal::LiteralArray(key.clone()));
                }
            }
        }
        LiteralArray(literals)
    }
}

/// Type annotation literal array is not a sequence of `(order, type)` pairs
#[derive(Debug, Eq, PartialEq)]
pub struct MalformedAnnotation {
    /// Index of the first offending literal
    pub position: usize,
}

impl fmt::Display for MalformedAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed type annotation at literal {}", self.position)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn argument_orders_are_negative() {
        assert_eq!(argument_order(0), -1);
        assert_eq!(argument_order(3), -4);
        assert_eq!(order_argument(-4), Some(3));
        assert_eq!(order_argument(0), None);
    }

    #[test]
    fn decodes_annotation() {
        let array = LiteralArray(vec![
            Literal::TagValue(LiteralTag::Integer),
            Literal::Integer(-1),
            Literal::TagValue(LiteralTag::BuiltinTypeIndex),
            Literal::BuiltinTypeIndex(4),
            Literal::TagValue(LiteralTag::Integer),
            Literal::Integer(2),
            Literal::TagValue(LiteralTag::LiteralArray),
            Literal::LiteralArray(String::from("Foo")),
        ]);
        let annotation = array.to_type_annotation().unwrap();
        assert_eq!(
            annotation,
            vec![(-1, TypeRef::Builtin(4)), (2, TypeRef::Literal(String::from("Foo")))]
        );
        assert_eq!(LiteralArray::from_type_annotation(&annotation), array);
    }

    #[test]
    fn rejects_mismatched_tags() {
        let array = LiteralArray(vec![
            Literal::TagValue(LiteralTag::Integer),
            Literal::Integer(0),
            Literal::TagValue(LiteralTag::Integer),
            Literal::BuiltinTypeIndex(4),
        ]);
        assert_eq!(
            array.to_type_annotation(),
            Err(MalformedAnnotation { position: 2 })
        );
    }
}
