//! Recursive descent parser assembling the proto file model.
//!
//! Each declaration parse begins by consuming the scanner's pending
//! documentation and, for `;`-terminated declarations, ends by probing the
//! same line for a trailing comment. Qualified names are composed by
//! threading the enclosing scope's prefix down through the recursion.

use indexmap::map::Entry;
use indexmap::IndexMap;
use log::debug;

use crate::scanner::Scanner;
use crate::{
    option_map_insert, EnumType, EnumValue, ExtendDeclaration, ExtensionsRange, Field, Label,
    MessageType, Method, OptionValue, ParseError, ProtoFile, ProtoOption, Service, Type,
    MAX_TAG_VALUE,
};

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Folds a repeated aggregate key into a list; the first occurrence
/// inserts plainly. Aggregate bodies never merge sub-maps.
fn aggregate_insert(map: &mut IndexMap<String, OptionValue>, key: String, value: OptionValue) {
    match map.entry(key) {
        Entry::Vacant(entry) => {
            entry.insert(value);
        }
        Entry::Occupied(mut entry) => match (entry.get_mut(), value) {
            (OptionValue::List(values), value) => values.push(value),
            (existing, value) => {
                let first = existing.clone();
                *existing = OptionValue::List(vec![first, value]);
            }
        },
    }
}

pub(crate) struct Parser<'a> {
    scanner: Scanner<'a>,
    file: ProtoFile,
}

impl<'a> Parser<'a> {
    pub fn new(file_name: &'a str, source: &str) -> Self {
        let file = ProtoFile {
            file_name: file_name.to_string(),
            ..ProtoFile::default()
        };
        Parser {
            scanner: Scanner::new(file_name, source),
            file,
        }
    }

    /// Consumes the whole schema and returns the file model.
    pub fn read_proto_file(mut self) -> Result<ProtoFile, ParseError> {
        debug!("parsing {}", self.file.file_name);
        loop {
            self.scanner.skip_whitespace()?;
            let documentation = self.scanner.take_doc();
            if self.scanner.peek().is_none() {
                break;
            }
            if self.scanner.try_consume(';') {
                // stray semicolons between declarations are tolerated
                continue;
            }
            let label = self.scanner.read_word()?;
            match label.as_str() {
                // recognised and discarded, accepted for forward compatibility
                "syntax" => self.read_syntax()?,
                "package" => self.read_package()?,
                "import" => self.read_import()?,
                "option" => {
                    let option = self.read_option()?;
                    self.expect(';')?;
                    option_map_insert(&mut self.file.options, &option.name, option.value);
                }
                "message" => {
                    let prefix = self.file.package.clone().unwrap_or_default();
                    let message = self.read_message(&prefix, documentation)?;
                    self.file.types.push(Type::Message(message));
                }
                "enum" => {
                    let prefix = self.file.package.clone().unwrap_or_default();
                    let enumeration = self.read_enum(&prefix, documentation)?;
                    self.file.types.push(Type::Enum(enumeration));
                }
                "service" => {
                    let prefix = self.file.package.clone().unwrap_or_default();
                    let service = self.read_service(&prefix, documentation)?;
                    self.file.services.push(service);
                }
                "extend" => {
                    let prefix = self.file.package.clone().unwrap_or_default();
                    let extend = self.read_extend(&prefix, documentation)?;
                    self.file.extend_declarations.push(extend);
                }
                _ => return Err(self.scanner.error(format!("unexpected label: {}", label))),
            }
        }
        debug!(
            "parsed {}: {} types, {} services",
            self.file.file_name,
            self.file.types.len(),
            self.file.services.len()
        );
        Ok(self.file)
    }

    fn read_syntax(&mut self) -> Result<(), ParseError> {
        self.expect('=')?;
        self.next_string()?;
        self.expect(';')
    }

    fn read_package(&mut self) -> Result<(), ParseError> {
        if self.file.package.is_some() {
            return Err(self.scanner.error("package name already set"));
        }
        let name = self.next_word()?;
        self.file.package = Some(name);
        self.expect(';')
    }

    fn read_import(&mut self) -> Result<(), ParseError> {
        self.scanner.skip_whitespace()?;
        if self.scanner.peek() == Some('"') {
            let path = self.scanner.read_quoted_string()?;
            self.file.imports.push(path);
        } else {
            let modifier = self.scanner.read_word()?;
            if modifier != "public" {
                return Err(self
                    .scanner
                    .error(format!("unexpected import modifier: {}", modifier)));
            }
            let path = self.next_string()?;
            self.file.public_imports.push(path);
        }
        self.expect(';')
    }

    fn read_message(
        &mut self,
        prefix: &str,
        documentation: String,
    ) -> Result<MessageType, ParseError> {
        let name = self.next_word()?;
        let mut message = MessageType {
            qualified_name: qualify(prefix, &name),
            name,
            documentation,
            fields: Vec::new(),
            nested_types: Vec::new(),
            extensions: Vec::new(),
            options: Vec::new(),
        };
        self.expect('{')?;
        loop {
            self.scanner.skip_whitespace()?;
            let documentation = self.scanner.take_doc();
            if self.scanner.try_consume('}') {
                break;
            }
            if self.scanner.peek().is_none() {
                return Err(self.scanner.error("unexpected end of input"));
            }
            if self.scanner.try_consume(';') {
                continue;
            }
            let label = self.scanner.read_word()?;
            match label.as_str() {
                "message" => {
                    let nested = self.read_message(&message.qualified_name, documentation)?;
                    message.nested_types.push(Type::Message(nested));
                }
                "enum" => {
                    let nested = self.read_enum(&message.qualified_name, documentation)?;
                    message.nested_types.push(Type::Enum(nested));
                }
                "extend" => {
                    let extend = self.read_extend(&message.qualified_name, documentation)?;
                    self.file.extend_declarations.push(extend);
                }
                "extensions" => {
                    let range = self.read_extensions(documentation)?;
                    message.extensions.push(range);
                }
                "option" => {
                    let option = self.read_option()?;
                    self.expect(';')?;
                    message.options.push(option);
                }
                "required" => message.fields.push(self.read_field(Label::Required, documentation)?),
                "optional" => message.fields.push(self.read_field(Label::Optional, documentation)?),
                "repeated" => message.fields.push(self.read_field(Label::Repeated, documentation)?),
                _ => return Err(self.scanner.error(format!("unexpected label: {}", label))),
            }
        }
        Ok(message)
    }

    /// Reads `TYPE NAME = TAG [options];` after the label.
    fn read_field(&mut self, label: Label, documentation: String) -> Result<Field, ParseError> {
        let type_name = self.next_word()?;
        let name = self.next_word()?;
        self.expect('=')?;
        let tag = self.next_int()?;
        if tag <= 0 {
            return Err(self.scanner.error("expected tag > 0"));
        }
        let mut options = Vec::new();
        if self.try_consume('[')? {
            options = self.read_option_list()?;
        }
        self.expect(';')?;
        let documentation = self.join_trailing(documentation);
        Ok(Field {
            label,
            type_name,
            name,
            tag,
            documentation,
            options,
        })
    }

    fn read_enum(&mut self, prefix: &str, documentation: String) -> Result<EnumType, ParseError> {
        let name = self.next_word()?;
        let qualified_name = qualify(prefix, &name);
        let mut values = Vec::new();
        self.expect('{')?;
        loop {
            self.scanner.skip_whitespace()?;
            let documentation = self.scanner.take_doc();
            if self.scanner.try_consume('}') {
                break;
            }
            if self.scanner.peek().is_none() {
                return Err(self.scanner.error("unexpected end of input"));
            }
            if self.scanner.try_consume(';') {
                continue;
            }
            let value_name = self.scanner.read_word()?;
            self.expect('=')?;
            let tag = self.next_int()?;
            let mut options = Vec::new();
            if self.try_consume('[')? {
                options = self.read_option_list()?;
            }
            self.expect(';')?;
            let documentation = self.join_trailing(documentation);
            values.push(EnumValue {
                name: value_name,
                tag,
                documentation,
                options,
            });
        }
        Ok(EnumType {
            name,
            qualified_name,
            documentation,
            values,
        })
    }

    fn read_service(&mut self, prefix: &str, documentation: String) -> Result<Service, ParseError> {
        let name = self.next_word()?;
        let qualified_name = qualify(prefix, &name);
        let mut methods = Vec::new();
        self.expect('{')?;
        loop {
            self.scanner.skip_whitespace()?;
            let documentation = self.scanner.take_doc();
            if self.scanner.try_consume('}') {
                break;
            }
            if self.scanner.peek().is_none() {
                return Err(self.scanner.error("unexpected end of input"));
            }
            if self.scanner.try_consume(';') {
                continue;
            }
            let label = self.scanner.read_word()?;
            if label != "rpc" {
                return Err(self.scanner.error(format!("unexpected label: {}", label)));
            }
            methods.push(self.read_rpc(documentation)?);
        }
        Ok(Service {
            name,
            qualified_name,
            documentation,
            methods,
        })
    }

    /// Reads `NAME (TYPE) returns (TYPE)` followed by `;` or an options
    /// body.
    fn read_rpc(&mut self, documentation: String) -> Result<Method, ParseError> {
        let name = self.next_word()?;
        self.expect('(')?;
        let request_type = self.next_word()?;
        self.expect(')')?;
        let returns = self.next_word()?;
        if returns != "returns" {
            return Err(self
                .scanner
                .error(format!("expected 'returns' but was {}", returns)));
        }
        self.expect('(')?;
        let response_type = self.next_word()?;
        self.expect(')')?;

        let mut options = IndexMap::new();
        let mut documentation = documentation;
        self.scanner.skip_whitespace()?;
        if self.scanner.try_consume('{') {
            loop {
                self.scanner.skip_whitespace()?;
                self.scanner.take_doc();
                if self.scanner.try_consume('}') {
                    break;
                }
                if self.scanner.peek().is_none() {
                    return Err(self.scanner.error("unexpected end of input"));
                }
                let label = self.scanner.read_word()?;
                if label != "option" {
                    return Err(self.scanner.error(format!("unexpected label: {}", label)));
                }
                let option = self.read_option()?;
                self.expect(';')?;
                option_map_insert(&mut options, &option.name, option.value);
            }
        } else {
            self.scanner.expect(';')?;
            documentation = self.join_trailing(documentation);
        }
        Ok(Method {
            name,
            documentation,
            request_type,
            response_type,
            options,
        })
    }

    fn read_extend(
        &mut self,
        prefix: &str,
        documentation: String,
    ) -> Result<ExtendDeclaration, ParseError> {
        let name = self.next_word()?;
        // a dotted extendee is already qualified
        let qualified_name = if name.contains('.') {
            name.clone()
        } else {
            qualify(prefix, &name)
        };
        let mut fields = Vec::new();
        self.expect('{')?;
        loop {
            self.scanner.skip_whitespace()?;
            let documentation = self.scanner.take_doc();
            if self.scanner.try_consume('}') {
                break;
            }
            if self.scanner.peek().is_none() {
                return Err(self.scanner.error("unexpected end of input"));
            }
            if self.scanner.try_consume(';') {
                continue;
            }
            let label = match self.scanner.read_word()?.as_str() {
                "required" => Label::Required,
                "optional" => Label::Optional,
                "repeated" => Label::Repeated,
                other => return Err(self.scanner.error(format!("unexpected label: {}", other))),
            };
            fields.push(self.read_field(label, documentation)?);
        }
        Ok(ExtendDeclaration {
            name,
            qualified_name,
            documentation,
            fields,
        })
    }

    /// Reads `START [to END];` after the `extensions` keyword. `max` maps
    /// to [`MAX_TAG_VALUE`].
    fn read_extensions(&mut self, documentation: String) -> Result<ExtensionsRange, ParseError> {
        let start = self.next_int()?;
        let mut end = start;
        self.scanner.skip_whitespace()?;
        if self.scanner.peek() != Some(';') {
            let to = self.scanner.read_word()?;
            if to != "to" {
                return Err(self.scanner.error(format!("expected 'to' but was {}", to)));
            }
            let word = self.next_word()?;
            end = if word == "max" {
                MAX_TAG_VALUE
            } else {
                self.scanner.parse_int(&word)?
            };
        }
        self.expect(';')?;
        Ok(ExtensionsRange {
            start,
            end,
            documentation,
        })
    }

    /// Reads `NAME = VALUE`. The name may be parenthesized and may carry
    /// dotted components after the closing paren; the parens are stripped.
    fn read_option(&mut self) -> Result<ProtoOption, ParseError> {
        self.scanner.skip_whitespace()?;
        let mut name = if self.scanner.try_consume('(') {
            let inner = self.next_word()?;
            self.expect(')')?;
            inner
        } else {
            self.scanner.read_word()?
        };
        if self.scanner.peek() == Some('.') {
            // for `(x).y` the suffix word starts with the dot
            let suffix = self.scanner.read_word()?;
            name.push_str(&suffix);
        }
        self.expect('=')?;
        let value = self.read_option_value()?;
        Ok(ProtoOption { name, value })
    }

    /// Reads `option = value, …]` after the opening bracket, tolerating a
    /// trailing comma.
    fn read_option_list(&mut self) -> Result<Vec<ProtoOption>, ParseError> {
        let mut options = Vec::new();
        loop {
            if self.try_consume(']')? {
                break;
            }
            options.push(self.read_option()?);
            self.scanner.skip_whitespace()?;
            if !self.scanner.try_consume(',') {
                self.expect(']')?;
                break;
            }
        }
        Ok(options)
    }

    fn read_option_value(&mut self) -> Result<OptionValue, ParseError> {
        self.scanner.skip_whitespace()?;
        match self.scanner.peek() {
            Some('"') => Ok(OptionValue::String(self.scanner.read_quoted_string()?)),
            Some('{') => self.read_aggregate(),
            Some('[') => self.read_value_list(),
            Some('-') => {
                self.scanner.expect('-')?;
                let word = self.scanner.read_word()?;
                Ok(OptionValue::String(format!("-{}", word)))
            }
            // bare identifiers, numbers and true/false keep their spelling
            _ => Ok(OptionValue::String(self.scanner.read_word()?)),
        }
    }

    /// Reads `[VALUE, VALUE, …]`, tolerating a trailing comma.
    fn read_value_list(&mut self) -> Result<OptionValue, ParseError> {
        self.scanner.expect('[')?;
        let mut values = Vec::new();
        loop {
            if self.try_consume(']')? {
                break;
            }
            values.push(self.read_option_value()?);
            self.scanner.skip_whitespace()?;
            if !self.scanner.try_consume(',') {
                self.expect(']')?;
                break;
            }
        }
        Ok(OptionValue::List(values))
    }

    /// Reads `{KEY: VALUE …}`. Commas and newlines both separate entries
    /// and trailing separators are allowed. A `[bracketed.key]` keeps its
    /// brackets; a repeated key folds its values into a list.
    fn read_aggregate(&mut self) -> Result<OptionValue, ParseError> {
        self.scanner.expect('{')?;
        let mut map = IndexMap::new();
        loop {
            if self.try_consume('}')? {
                break;
            }
            if self.scanner.peek().is_none() {
                return Err(self.scanner.error("unexpected end of input"));
            }
            let key = if self.scanner.try_consume('[') {
                let inner = self.next_word()?;
                self.expect(']')?;
                format!("[{}]", inner)
            } else {
                self.scanner.read_word()?
            };
            self.expect(':')?;
            let value = self.read_option_value()?;
            aggregate_insert(&mut map, key, value);
            self.scanner.skip_whitespace()?;
            self.scanner.try_consume(',');
        }
        Ok(OptionValue::Map(map))
    }

    /// Attaches a same-line trailing comment to the declaration that just
    /// ended, joined to any leading documentation.
    fn join_trailing(&mut self, leading: String) -> String {
        match self.scanner.trailing_doc() {
            Some(trailing) if leading.is_empty() => trailing,
            Some(trailing) => format!("{}\n{}", leading, trailing),
            None => leading,
        }
    }

    // scanner wrappers that skip interleaved whitespace and comments

    fn next_word(&mut self) -> Result<String, ParseError> {
        self.scanner.skip_whitespace()?;
        self.scanner.read_word()
    }

    fn next_int(&mut self) -> Result<i32, ParseError> {
        self.scanner.skip_whitespace()?;
        self.scanner.read_int()
    }

    fn next_string(&mut self) -> Result<String, ParseError> {
        self.scanner.skip_whitespace()?;
        self.scanner.read_quoted_string()
    }

    fn expect(&mut self, c: char) -> Result<(), ParseError> {
        self.scanner.skip_whitespace()?;
        self.scanner.expect(c)
    }

    fn try_consume(&mut self, c: char) -> Result<bool, ParseError> {
        self.scanner.skip_whitespace()?;
        Ok(self.scanner.try_consume(c))
    }
}
