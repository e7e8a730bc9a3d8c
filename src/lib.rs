//! A recursive descent parser for .proto files
//!
//! Parses proto2 schema source text into an in-memory model of the file:
//! messages, enums, services, extend blocks, options (including aggregate
//! values) and the documentation comments attached to each declaration.
//! The parser works on an in-memory buffer and does no I/O; loading files
//! and resolving imports is left to the caller.

mod parser;
mod scanner;

use indexmap::map::Entry;
use indexmap::IndexMap;
use thiserror::Error;

use crate::parser::Parser;

/// The largest tag number a field may carry, and the value an
/// `extensions N to max;` range ends at.
pub const MAX_TAG_VALUE: i32 = (1 << 29) - 1;

/// Parses the schema in `source` into a [`ProtoFile`].
///
/// `file_name` is the logical name of the schema; it is recorded on the
/// returned file and in any diagnostic, but nothing is read from disk.
pub fn parse(file_name: &str, source: &str) -> Result<ProtoFile, ParseError> {
    Parser::new(file_name, source).read_proto_file()
}

/// Convenience wrapper over [`parse`] for callers holding the source as a
/// stream of characters rather than a string.
pub fn parse_chars<I>(file_name: &str, source: I) -> Result<ProtoFile, ParseError>
where
    I: IntoIterator<Item = char>,
{
    let source: String = source.into_iter().collect();
    parse(file_name, &source)
}

/// Failure raised when a schema does not parse.
///
/// One class covers lexical, grammar and shallow semantic faults; they are
/// distinguished only by message. The position is the 1-based line and
/// column the scanner had reached when the fault was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error in {file_name} at {line}:{column}: {message}")]
pub struct ParseError {
    pub file_name: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// A parsed .proto file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtoFile {
    /// Logical name the schema was parsed under
    pub file_name: String,
    /// Package declared by the file, if any
    pub package: Option<String>,
    /// Imports
    pub imports: Vec<String>,
    /// Public imports, re-exported to files that import this one
    pub public_imports: Vec<String>,
    /// Top level messages and enums
    pub types: Vec<Type>,
    /// Services
    pub services: Vec<Service>,
    /// File level options
    pub options: IndexMap<String, OptionValue>,
    /// Extend blocks, including ones nested inside messages
    pub extend_declarations: Vec<ExtendDeclaration>,
}

impl ProtoFile {
    /// Find a top level type by simple name.
    pub fn type_by_name(&self, name: &str) -> Option<&Type> {
        self.types.iter().find(|t| t.name() == name)
    }
}

/// A named type declaration, either a message or an enum
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Message(MessageType),
    Enum(EnumType),
}

impl Type {
    /// Simple name of the declaration
    pub fn name(&self) -> &str {
        match self {
            Type::Message(message) => &message.name,
            Type::Enum(enumeration) => &enumeration.name,
        }
    }

    /// Name qualified through the package and any enclosing messages
    pub fn qualified_name(&self) -> &str {
        match self {
            Type::Message(message) => &message.qualified_name,
            Type::Enum(enumeration) => &enumeration.qualified_name,
        }
    }

    /// Documentation attached to the declaration
    pub fn documentation(&self) -> &str {
        match self {
            Type::Message(message) => &message.documentation,
            Type::Enum(enumeration) => &enumeration.documentation,
        }
    }
}

/// A protobuf message
#[derive(Debug, Clone, PartialEq)]
pub struct MessageType {
    /// Message name
    pub name: String,
    /// Name qualified through the package and any enclosing messages
    pub qualified_name: String,
    /// Documentation attached to the message
    pub documentation: String,
    /// Message fields
    pub fields: Vec<Field>,
    /// Nested messages and enums
    pub nested_types: Vec<Type>,
    /// Tag ranges reserved for extensions
    pub extensions: Vec<ExtensionsRange>,
    /// Message level options
    pub options: Vec<ProtoOption>,
}

impl MessageType {
    /// Find a field by name.
    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A protobuf enumeration
#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    /// Enum name
    pub name: String,
    /// Name qualified through the package and any enclosing messages
    pub qualified_name: String,
    /// Documentation attached to the enum
    pub documentation: String,
    /// Enum values
    pub values: Vec<EnumValue>,
}

/// A single value of an enumeration
#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    /// Value name
    pub name: String,
    /// Value number
    pub tag: i32,
    /// Documentation attached to the value
    pub documentation: String,
    /// Options from the bracketed list after the tag
    pub options: Vec<ProtoOption>,
}

/// A field label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    /// A well-formed message must have exactly one of this field.
    Required,
    /// A well-formed message can have zero or one of this field (but not more than one).
    Optional,
    /// This field can be repeated any number of times (including zero) in a well-formed message.
    /// The order of the repeated values will be preserved.
    Repeated,
}

/// A protobuf field
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field label
    pub label: Label,
    /// Type name as written in the schema, unresolved
    pub type_name: String,
    /// Field name
    pub name: String,
    /// Tag number
    pub tag: i32,
    /// Documentation attached to the field
    pub documentation: String,
    /// Options from the bracketed list after the tag
    pub options: Vec<ProtoOption>,
}

impl Field {
    /// The options folded into a single ordered mapping. Dotted option
    /// names nest into sub-maps and repeated names merge, so
    /// `(x).a = 1, (x).b = 2` comes back as `x -> {a: 1, b: 2}`.
    pub fn options_map(&self) -> IndexMap<String, OptionValue> {
        let mut map = IndexMap::new();
        for option in &self.options {
            option_map_insert(&mut map, &option.name, option.value.clone());
        }
        map
    }

    /// Value of the option named exactly `default`, if present.
    pub fn default_value(&self) -> Option<&OptionValue> {
        self.options
            .iter()
            .find(|option| option.name == "default")
            .map(|option| &option.value)
    }

    /// True if the field carries `deprecated = true`.
    pub fn is_deprecated(&self) -> bool {
        self.options.iter().any(|option| {
            option.name == "deprecated"
                && matches!(&option.value, OptionValue::String(value) if value == "true")
        })
    }
}

/// A service declaration
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    /// Service name
    pub name: String,
    /// Name qualified through the package
    pub qualified_name: String,
    /// Documentation attached to the service
    pub documentation: String,
    /// Methods declared with `rpc`
    pub methods: Vec<Method>,
}

/// A single `rpc` method of a service
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    /// Method name
    pub name: String,
    /// Documentation attached to the method
    pub documentation: String,
    /// Request type name, unresolved
    pub request_type: String,
    /// Response type name, unresolved
    pub response_type: String,
    /// Method level options
    pub options: IndexMap<String, OptionValue>,
}

/// An `extend` block adding fields to a message declared elsewhere
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendDeclaration {
    /// Extended type name as written
    pub name: String,
    /// Extended type name qualified through the enclosing scope; a dotted
    /// name is taken as already qualified
    pub qualified_name: String,
    /// Documentation attached to the block
    pub documentation: String,
    /// Extension fields
    pub fields: Vec<Field>,
}

/// An `extensions` range reserving tags for external extenders
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionsRange {
    /// First reserved tag
    pub start: i32,
    /// Last reserved tag, inclusive; [`MAX_TAG_VALUE`] for `max`
    pub end: i32,
    /// Documentation attached to the range
    pub documentation: String,
}

/// A single `name = value` option
#[derive(Debug, Clone, PartialEq)]
pub struct ProtoOption {
    /// Option name; parenthesized parts are stored without the parens
    pub name: String,
    /// Option value
    pub value: OptionValue,
}

/// The value of an option: a scalar kept in its source spelling, an
/// ordered list, or an ordered mapping of names to values.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// A bare identifier, `true`/`false`, a number in its original
    /// spelling, or an escape-decoded quoted string
    String(String),
    /// `[value, value, …]`
    List(Vec<OptionValue>),
    /// `{name: value …}`; iteration follows insertion order, equality
    /// compares as a logical mapping
    Map(IndexMap<String, OptionValue>),
}

/// Inserts `name = value` into an option mapping. A dotted name nests into
/// sub-maps one segment at a time, then merges with whatever is already
/// there.
pub(crate) fn option_map_insert(
    map: &mut IndexMap<String, OptionValue>,
    name: &str,
    value: OptionValue,
) {
    let mut segments = name.rsplit('.');
    // rsplit always yields at least one segment
    let mut key = segments.next().unwrap_or(name);
    let mut value = value;
    for outer in segments {
        let mut inner = IndexMap::new();
        inner.insert(key.to_string(), value);
        value = OptionValue::Map(inner);
        key = outer;
    }
    merge_option_value(map, key, value);
}

/// Merge rule for option mappings: two maps merge key by key, anything
/// else folds into a list in arrival order.
fn merge_option_value(map: &mut IndexMap<String, OptionValue>, key: &str, value: OptionValue) {
    match map.entry(key.to_string()) {
        Entry::Vacant(entry) => {
            entry.insert(value);
        }
        Entry::Occupied(mut entry) => match (entry.get_mut(), value) {
            (OptionValue::Map(existing), OptionValue::Map(incoming)) => {
                for (incoming_key, incoming_value) in incoming {
                    merge_option_value(existing, &incoming_key, incoming_value);
                }
            }
            (OptionValue::List(existing), value) => existing.push(value),
            (existing, value) => {
                let first = existing.clone();
                *existing = OptionValue::List(vec![first, value]);
            }
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn string(value: &str) -> OptionValue {
        OptionValue::String(value.to_string())
    }

    fn field_with_options(options: Vec<(&str, OptionValue)>) -> Field {
        Field {
            label: Label::Optional,
            type_name: "string".to_string(),
            name: "f".to_string(),
            tag: 1,
            documentation: String::new(),
            options: options
                .into_iter()
                .map(|(name, value)| ProtoOption {
                    name: name.to_string(),
                    value,
                })
                .collect(),
        }
    }

    #[test]
    fn test_option_map_insert_plain() {
        let mut map = IndexMap::new();
        option_map_insert(&mut map, "java_package", string("com.example"));
        assert_eq!(map.get("java_package"), Some(&string("com.example")));
    }

    #[test]
    fn test_option_map_insert_dotted_nests() {
        let mut map = IndexMap::new();
        option_map_insert(&mut map, "a.b.c", string("1"));
        let a = match map.get("a") {
            Some(OptionValue::Map(a)) => a,
            other => panic!("expected map, got {:?}", other),
        };
        let b = match a.get("b") {
            Some(OptionValue::Map(b)) => b,
            other => panic!("expected map, got {:?}", other),
        };
        assert_eq!(b.get("c"), Some(&string("1")));
    }

    #[test]
    fn test_option_map_insert_merges_maps() {
        let mut map = IndexMap::new();
        option_map_insert(&mut map, "a.b", string("1"));
        option_map_insert(&mut map, "a.c", string("2"));
        let mut expected = IndexMap::new();
        expected.insert("b".to_string(), string("1"));
        expected.insert("c".to_string(), string("2"));
        assert_eq!(map.get("a"), Some(&OptionValue::Map(expected)));
    }

    #[test]
    fn test_option_map_insert_folds_scalars_into_list() {
        let mut map = IndexMap::new();
        option_map_insert(&mut map, "k", string("1"));
        option_map_insert(&mut map, "k", string("2"));
        option_map_insert(&mut map, "k", string("3"));
        assert_eq!(
            map.get("k"),
            Some(&OptionValue::List(vec![
                string("1"),
                string("2"),
                string("3")
            ]))
        );
    }

    #[test]
    fn test_map_equality_ignores_insertion_order() {
        let mut left = IndexMap::new();
        left.insert("a".to_string(), string("1"));
        left.insert("b".to_string(), string("2"));
        let mut right = IndexMap::new();
        right.insert("b".to_string(), string("2"));
        right.insert("a".to_string(), string("1"));
        assert_eq!(OptionValue::Map(left), OptionValue::Map(right));
    }

    #[test]
    fn test_options_map_merges_sub_paths() {
        let field = field_with_options(vec![("x.a", string("1")), ("x.b", string("2"))]);
        let mut expected = IndexMap::new();
        expected.insert("a".to_string(), string("1"));
        expected.insert("b".to_string(), string("2"));
        assert_eq!(field.options_map().get("x"), Some(&OptionValue::Map(expected)));
    }

    #[test]
    fn test_default_value() {
        let field = field_with_options(vec![("default", string("10")), ("packed", string("true"))]);
        assert_eq!(field.default_value(), Some(&string("10")));

        let bare = field_with_options(vec![]);
        assert_eq!(bare.default_value(), None);
    }

    #[test]
    fn test_is_deprecated() {
        assert!(field_with_options(vec![("deprecated", string("true"))]).is_deprecated());
        assert!(!field_with_options(vec![("deprecated", string("false"))]).is_deprecated());
        assert!(!field_with_options(vec![]).is_deprecated());
    }

    #[test]
    fn test_type_accessors() {
        let message = Type::Message(MessageType {
            name: "M".to_string(),
            qualified_name: "pkg.M".to_string(),
            documentation: "A message".to_string(),
            fields: Vec::new(),
            nested_types: Vec::new(),
            extensions: Vec::new(),
            options: Vec::new(),
        });
        assert_eq!(message.name(), "M");
        assert_eq!(message.qualified_name(), "pkg.M");
        assert_eq!(message.documentation(), "A message");
    }

    #[test]
    fn test_parse_error_display() {
        let error = ParseError {
            file_name: "broken.proto".to_string(),
            line: 3,
            column: 14,
            message: "expected tag > 0".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "syntax error in broken.proto at 3:14: expected tag > 0"
        );
    }
}
