//! Parse Thrift IDL source into a [`ThriftFileElement`] using PEST.
//!
//! Parsing never stops at the first problem. Each top-level statement is parsed
//! on its own; after a syntax error the parser skips to the next line that
//! starts with a top-level keyword and carries on, so one run reports every
//! broken definition. Semantic problems found while building elements
//! (duplicate field IDs, unsupported constructs, bad escapes) go to the same
//! [`ErrorReporter`].
//!
//! Comments adjacent to a declaration become its documentation: the comments
//! directly before it, plus at most one comment starting on the same line right
//! after it. A comment claimed as trailing documentation is never reused as
//! leading documentation of the next declaration.

use crate::ast::*;
use crate::error::{ErrorReporter, LoadError};
use crate::location::Location;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct ThriftParser;

const TOP_LEVEL_KEYWORDS: &[&str] = &[
    "include",
    "cpp_include",
    "namespace",
    "php_namespace",
    "xsd_namespace",
    "const",
    "typedef",
    "enum",
    "senum",
    "struct",
    "union",
    "exception",
    "service",
];

/// Parse one IDL file; fails with every syntax and element error found.
pub fn parse(location: &Location, source: &str) -> Result<ThriftFileElement, LoadError> {
    let mut reporter = ErrorReporter::new();
    let file = parse_with_reporter(location, source, &mut reporter);
    if reporter.has_error() {
        return Err(LoadError::from_reporter(reporter));
    }
    Ok(file)
}

/// Parse one IDL file, recording problems in `reporter`.
///
/// Always returns the elements that could be built; callers must check
/// [`ErrorReporter::has_error`] before trusting the result.
pub fn parse_with_reporter(
    location: &Location,
    source: &str,
    reporter: &mut ErrorReporter,
) -> ThriftFileElement {
    let mut builder = FileBuilder::new(location, source, reporter);
    builder.run();
    builder.finish()
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CommentKind {
    Slash,
    Hash,
    Block,
}

#[derive(Debug, Clone)]
struct CommentToken {
    start: usize,
    end: usize,
    kind: CommentKind,
    text: String,
}

/// Byte offset -> 1-based line/column.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                starts.push(i + 1);
            }
        }
        LineIndex { starts }
    }

    fn line_col(&self, source: &str, pos: usize) -> (i32, i32) {
        let line = self.starts.partition_point(|&s| s <= pos).max(1);
        let line_start = self.starts[line - 1];
        let column = source[line_start..pos].chars().count() + 1;
        (line as i32, column as i32)
    }
}

fn scan_comments(source: &str) -> Vec<CommentToken> {
    let pairs = match ThriftParser::parse(Rule::doc_scan, source) {
        Ok(pairs) => pairs,
        Err(_) => return Vec::new(),
    };
    let mut out = Vec::new();
    for pair in pairs.flatten() {
        if pair.as_rule() != Rule::doc_comment {
            continue;
        }
        let text = pair.as_str();
        let kind = if text.starts_with("//") {
            CommentKind::Slash
        } else if text.starts_with('#') {
            CommentKind::Hash
        } else {
            CommentKind::Block
        };
        out.push(CommentToken {
            start: pair.as_span().start(),
            end: pair.as_span().end(),
            kind,
            text: text.to_string(),
        });
    }
    out
}

struct FileBuilder<'a> {
    source: &'a str,
    location: &'a Location,
    reporter: &'a mut ErrorReporter,
    lines: LineIndex,
    comments: Vec<CommentToken>,
    /// Indices into `comments` already used as trailing documentation.
    claimed: Vec<bool>,
    /// Offset of the statement slice currently being built.
    offset: usize,
    file: ThriftFileElement,
}

impl<'a> FileBuilder<'a> {
    fn new(location: &'a Location, source: &'a str, reporter: &'a mut ErrorReporter) -> Self {
        let comments = scan_comments(source);
        let claimed = vec![false; comments.len()];
        FileBuilder {
            source,
            location,
            reporter,
            lines: LineIndex::new(source),
            comments,
            claimed,
            offset: 0,
            file: ThriftFileElement::empty(location.clone()),
        }
    }

    fn run(&mut self) {
        let mut pos = 0;
        loop {
            pos = self.skip_trivia(pos);
            if pos >= self.source.len() {
                break;
            }
            let source = self.source;
            let rest = &source[pos..];
            if ThriftParser::parse(Rule::trivia, rest).is_ok() {
                break;
            }
            match ThriftParser::parse(Rule::statement, rest) {
                Ok(mut pairs) => {
                    let Some(statement) = pairs.next() else { break };
                    let consumed = statement.as_span().end();
                    self.offset = pos;
                    self.build_statement(statement);
                    if consumed == 0 {
                        break;
                    }
                    pos += consumed;
                }
                Err(e) => {
                    let error_pos = pos + error_offset(&e);
                    let message = e
                        .renamed_rules(describe_rule)
                        .variant
                        .message()
                        .into_owned();
                    let loc = self.location_at(error_pos.min(self.source.len()));
                    self.reporter.error(&loc, format!("Syntax error: {}", message));
                    match self.next_statement_start(pos) {
                        Some(next) => pos = next,
                        None => break,
                    }
                }
            }
        }
    }

    fn finish(mut self) -> ThriftFileElement {
        let jvm = self
            .file
            .namespaces
            .iter()
            .find(|ns| ns.scope == NamespaceScope::Jvm)
            .cloned();
        if let Some(jvm) = jvm {
            for scope in NamespaceScope::jvm_members() {
                if !self.file.namespaces.iter().any(|ns| ns.scope == *scope) {
                    let mut inherited = jvm.clone();
                    inherited.scope = *scope;
                    self.file.namespaces.push(inherited);
                }
            }
        }
        self.file
    }

    // ==================== Positions ====================

    fn location_at(&self, abs: usize) -> Location {
        let (line, column) = self.lines.line_col(self.source, abs);
        self.location.at(line, column)
    }

    fn location_of(&self, pair: &Pair<Rule>) -> Location {
        self.location_at(self.offset + pair.as_span().start())
    }

    fn skip_trivia(&self, mut pos: usize) -> usize {
        loop {
            let rest = &self.source[pos..];
            let trimmed = rest.trim_start();
            pos += rest.len() - trimmed.len();
            match self.comments.iter().find(|c| c.start == pos) {
                Some(c) => pos = c.end,
                None => return pos,
            }
        }
    }

    fn inside_comment(&self, pos: usize) -> bool {
        self.comments.iter().any(|c| c.start <= pos && pos < c.end)
    }

    /// First line after the one containing `from` that begins with a top-level keyword.
    fn next_statement_start(&self, from: usize) -> Option<usize> {
        let first_line = self.lines.starts.partition_point(|&s| s <= from);
        for &line_start in &self.lines.starts[first_line..] {
            let line = &self.source[line_start..];
            let trimmed = line.trim_start_matches([' ', '\t']);
            let start = line_start + (line.len() - trimmed.len());
            if self.inside_comment(start) {
                continue;
            }
            let starts_statement = TOP_LEVEL_KEYWORDS.iter().any(|kw| {
                trimmed.starts_with(kw)
                    && !trimmed[kw.len()..]
                        .starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            });
            if starts_statement {
                return Some(start);
            }
        }
        None
    }

    // ==================== Documentation ====================

    fn documentation(&mut self, pair: &Pair<Rule>) -> String {
        let start = self.offset + pair.as_span().start();
        let end = self.content_end(start, self.offset + pair.as_span().end());
        let mut tokens = self.leading_comments(start);
        tokens.extend(self.trailing_comment(end));
        format_doc(&tokens)
    }

    /// Spans that end in an optional rule also cover the trivia after them;
    /// back off to the last real token.
    fn content_end(&self, start: usize, mut end: usize) -> usize {
        loop {
            end = start + self.source[start..end].trim_end().len();
            match self.comments.iter().find(|c| c.end == end && c.start >= start) {
                Some(c) => end = c.start,
                None => return end,
            }
        }
    }

    fn leading_comments(&self, start: usize) -> Vec<CommentToken> {
        // Walk back over whitespace and comments to the previous real token.
        let mut gap_start = start;
        loop {
            gap_start = self.source[..gap_start].trim_end().len();
            match self.comments.iter().find(|c| c.end == gap_start) {
                Some(c) => gap_start = c.start,
                None => break,
            }
        }
        self.comments
            .iter()
            .enumerate()
            .filter(|(i, c)| c.start >= gap_start && c.end <= start && !self.claimed[*i])
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn trailing_comment(&mut self, end: usize) -> Option<CommentToken> {
        let rest = &self.source[end.min(self.source.len())..];
        let after_blanks = end + (rest.len() - rest.trim_start_matches([' ', '\t']).len());
        let index = self.comments.iter().position(|c| c.start == after_blanks)?;
        if self.claimed[index] {
            return None;
        }
        self.claimed[index] = true;
        Some(self.comments[index].clone())
    }

    // ==================== Statements ====================

    fn build_statement(&mut self, statement: Pair<Rule>) {
        for inner in statement.into_inner() {
            match inner.as_rule() {
                Rule::include => self.build_include(inner, false),
                Rule::cpp_include => self.build_include(inner, true),
                Rule::namespace => self.build_namespace(inner),
                Rule::php_namespace => self.build_php_namespace(inner),
                Rule::xsd_namespace => {
                    let loc = self.location_of(&inner);
                    self.reporter.error(&loc, "'xsd_namespace' is unsupported");
                }
                Rule::senum_def => {
                    let loc = self.location_of(&inner);
                    self.reporter
                        .error(&loc, "'senum' is unsupported; use 'enum' instead");
                }
                Rule::const_def => self.build_const(inner),
                Rule::typedef_def => self.build_typedef(inner),
                Rule::enum_def => self.build_enum(inner),
                Rule::struct_def => {
                    let s = self.build_struct(inner, StructKind::Struct);
                    self.file.structs.push(s);
                }
                Rule::union_def => {
                    let s = self.build_struct(inner, StructKind::Union);
                    self.file.unions.push(s);
                }
                Rule::exception_def => {
                    let s = self.build_struct(inner, StructKind::Exception);
                    self.file.exceptions.push(s);
                }
                Rule::service_def => self.build_service(inner),
                _ => {}
            }
        }
    }

    fn build_include(&mut self, pair: Pair<Rule>, is_cpp: bool) {
        let location = self.location_of(&pair);
        for inner in pair.into_inner() {
            if inner.as_rule() == Rule::literal {
                let lit_loc = self.location_of(&inner);
                let path = self.unquote(&lit_loc, inner.as_str(), false);
                self.file.includes.push(IncludeElement {
                    location: location.clone(),
                    is_cpp,
                    path,
                });
            }
        }
    }

    fn build_namespace(&mut self, pair: Pair<Rule>) {
        let location = self.location_of(&pair);
        let mut scope_name = String::new();
        let mut scope_loc = location.clone();
        let mut namespace = String::new();
        let mut annotations = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::namespace_scope => {
                    scope_loc = self.location_of(&inner);
                    scope_name = inner.as_str().to_string();
                }
                Rule::namespace_name => {
                    let name = inner.into_inner().next();
                    if let Some(name) = name {
                        namespace = match name.as_rule() {
                            Rule::literal => {
                                let loc = self.location_of(&name);
                                self.unquote(&loc, name.as_str(), true)
                            }
                            _ => name.as_str().to_string(),
                        };
                    }
                }
                Rule::annotation_list => annotations = Some(self.build_annotations(inner)),
                _ => {}
            }
        }
        let Some(scope) = NamespaceScope::for_thrift_name(&scope_name) else {
            self.reporter
                .warn(&scope_loc, format!("Unknown namespace scope '{}'", scope_name));
            return;
        };
        self.file.namespaces.push(NamespaceElement {
            location,
            scope,
            namespace,
            annotations,
        });
    }

    fn build_php_namespace(&mut self, pair: Pair<Rule>) {
        let location = self.location_of(&pair);
        let mut namespace = String::new();
        let mut annotations = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::literal => {
                    let loc = self.location_of(&inner);
                    namespace = self.unquote(&loc, inner.as_str(), true);
                }
                Rule::annotation_list => annotations = Some(self.build_annotations(inner)),
                _ => {}
            }
        }
        self.file.namespaces.push(NamespaceElement {
            location,
            scope: NamespaceScope::Php,
            namespace,
            annotations,
        });
    }

    fn build_const(&mut self, pair: Pair<Rule>) {
        let location = self.location_of(&pair);
        let documentation = self.documentation(&pair);
        let mut type_element = None;
        let mut name = String::new();
        let mut value = None;
        let mut value_loc = location.clone();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::field_type => type_element = Some(self.build_type(inner)),
                Rule::ident => name = inner.as_str().to_string(),
                Rule::const_value => {
                    value_loc = self.location_of(&inner);
                    value = self.build_const_value(inner);
                }
                _ => {}
            }
        }
        let (Some(type_element), Some(value)) = (type_element, value) else {
            self.reporter.error(&value_loc, "Invalid const value");
            return;
        };
        self.file.constants.push(ConstElement {
            uuid: Uuid::new_v4(),
            location,
            documentation,
            annotations: None,
            type_element,
            name,
            value,
        });
    }

    fn build_typedef(&mut self, pair: Pair<Rule>) {
        let location = self.location_of(&pair);
        let documentation = self.documentation(&pair);
        let mut old_type = None;
        let mut new_name = String::new();
        let mut annotations = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::field_type => old_type = Some(self.build_type(inner)),
                Rule::ident => new_name = inner.as_str().to_string(),
                Rule::annotation_list => annotations = Some(self.build_annotations(inner)),
                _ => {}
            }
        }
        let Some(old_type) = old_type else { return };
        self.file.typedefs.push(TypedefElement {
            uuid: Uuid::new_v4(),
            location,
            documentation,
            annotations,
            old_type,
            new_name,
        });
    }

    fn build_enum(&mut self, pair: Pair<Rule>) {
        let location = self.location_of(&pair);
        let documentation = self.documentation(&pair);
        let mut name = String::new();
        let mut annotations = None;
        let mut members = Vec::new();
        let mut next_value: i64 = 0;
        let mut seen = HashMap::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::ident => name = inner.as_str().to_string(),
                Rule::annotation_list => annotations = Some(self.build_annotations(inner)),
                Rule::enum_member => {
                    let member_loc = self.location_of(&inner);
                    let member_doc = self.documentation(&inner);
                    let mut member_name = String::new();
                    let mut value = next_value;
                    let mut member_annotations = None;
                    for part in inner.into_inner() {
                        match part.as_rule() {
                            Rule::ident => member_name = part.as_str().to_string(),
                            Rule::integer => {
                                value = match parse_integer(part.as_str()) {
                                    Some(v) => v,
                                    None => {
                                        self.reporter.error(
                                            &member_loc,
                                            format!("Invalid enum value: {}", part.as_str()),
                                        );
                                        next_value
                                    }
                                }
                            }
                            Rule::annotation_list => {
                                member_annotations = Some(self.build_annotations(part))
                            }
                            _ => {}
                        }
                    }
                    let Ok(value) = i32::try_from(value) else {
                        self.reporter.error(
                            &member_loc,
                            format!("enum value out of range for i32: {}", value),
                        );
                        continue;
                    };
                    if seen.insert(value, member_name.clone()).is_some() {
                        self.reporter
                            .error(&member_loc, format!("duplicate enum value: {}", value));
                        continue;
                    }
                    next_value = i64::from(value) + 1;
                    members.push(EnumMemberElement {
                        uuid: Uuid::new_v4(),
                        location: member_loc,
                        documentation: member_doc,
                        annotations: member_annotations,
                        name: member_name,
                        value,
                    });
                }
                _ => {}
            }
        }
        self.file.enums.push(EnumElement {
            uuid: Uuid::new_v4(),
            location,
            documentation,
            annotations,
            name,
            members,
        });
    }

    fn build_struct(&mut self, pair: Pair<Rule>, kind: StructKind) -> StructElement {
        let location = self.location_of(&pair);
        let documentation = self.documentation(&pair);
        let mut name = String::new();
        let mut annotations = None;
        let mut field_pairs = Vec::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::ident => name = inner.as_str().to_string(),
                Rule::field => field_pairs.push(inner),
                Rule::annotation_list => annotations = Some(self.build_annotations(inner)),
                _ => {}
            }
        }
        let fields = self.build_field_list(field_pairs, Requiredness::Default);
        StructElement {
            uuid: Uuid::new_v4(),
            location,
            documentation,
            annotations,
            name,
            kind,
            fields,
        }
    }

    fn build_service(&mut self, pair: Pair<Rule>) {
        let location = self.location_of(&pair);
        let documentation = self.documentation(&pair);
        let mut name = String::new();
        let mut extends_service = None;
        let mut annotations = None;
        let mut functions = Vec::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::ident => name = inner.as_str().to_string(),
                Rule::service_extends => {
                    for part in inner.into_inner() {
                        if part.as_rule() == Rule::field_type {
                            extends_service = Some(self.build_type(part));
                        }
                    }
                }
                Rule::function => functions.push(self.build_function(inner)),
                Rule::annotation_list => annotations = Some(self.build_annotations(inner)),
                _ => {}
            }
        }
        if let Some(base) = &extends_service {
            if !matches!(base.kind, TypeElementKind::Scalar(_)) {
                self.reporter
                    .error(&location, "services cannot extend collections");
                return;
            }
        }
        self.file.services.push(ServiceElement {
            uuid: Uuid::new_v4(),
            location,
            documentation,
            annotations,
            name,
            extends_service,
            functions,
        });
    }

    fn build_function(&mut self, pair: Pair<Rule>) -> FunctionElement {
        let location = self.location_of(&pair);
        let documentation = self.documentation(&pair);
        let mut one_way = false;
        let mut return_type = None;
        let mut name = String::new();
        let mut param_pairs = Vec::new();
        let mut throws_pairs = Vec::new();
        let mut annotations = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::oneway => one_way = true,
                Rule::function_type => {
                    if let Some(t) = inner.into_inner().next() {
                        return_type = Some(match t.as_rule() {
                            Rule::void_type => TypeElement::scalar(self.location_of(&t), "void"),
                            _ => self.build_type(t),
                        });
                    }
                }
                Rule::ident => name = inner.as_str().to_string(),
                Rule::field => param_pairs.push(inner),
                Rule::throws_list => {
                    throws_pairs.extend(inner.into_inner().filter(|p| p.as_rule() == Rule::field))
                }
                Rule::annotation_list => annotations = Some(self.build_annotations(inner)),
                _ => {}
            }
        }
        let params = self.build_field_list(param_pairs, Requiredness::Required);
        let exceptions = self.build_field_list(throws_pairs, Requiredness::Default);
        let return_type = return_type.unwrap_or_else(|| TypeElement::scalar(location.clone(), "void"));
        FunctionElement {
            uuid: Uuid::new_v4(),
            location,
            documentation,
            annotations,
            one_way,
            return_type,
            name,
            params,
            exceptions,
        }
    }

    // ==================== Fields ====================

    fn build_field_list(
        &mut self,
        pairs: Vec<Pair<Rule>>,
        default_requiredness: Requiredness,
    ) -> Vec<FieldElement> {
        let mut fields = Vec::with_capacity(pairs.len());
        let mut next_id: i32 = 1;
        for pair in pairs {
            let field = self.build_field(pair, next_id, default_requiredness);
            if field.field_id <= 0 {
                self.reporter
                    .error(&field.location, "field ID must be greater than zero");
            }
            if field.field_id >= next_id {
                next_id = field.field_id.saturating_add(1);
            }
            fields.push(field);
        }
        report_duplicate_ids(
            self.reporter,
            fields.iter().map(|f| (f.field_id, &f.location)),
            "duplicate field ID",
        );
        fields
    }

    fn build_field(
        &mut self,
        pair: Pair<Rule>,
        default_id: i32,
        default_requiredness: Requiredness,
    ) -> FieldElement {
        let location = self.location_of(&pair);
        let documentation = self.documentation(&pair);
        let mut field_id = default_id;
        let mut requiredness = default_requiredness;
        let mut field_type = None;
        let mut name = String::new();
        let mut const_value = None;
        let mut annotations = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::integer => {
                    field_id = match parse_integer(inner.as_str()).and_then(|v| i32::try_from(v).ok()) {
                        Some(id) => id,
                        None => {
                            self.reporter.error(
                                &location,
                                format!("field ID out of range: {}", inner.as_str()),
                            );
                            default_id
                        }
                    }
                }
                Rule::requiredness => {
                    requiredness = match inner.as_str() {
                        "required" => Requiredness::Required,
                        _ => Requiredness::Optional,
                    }
                }
                Rule::field_type => field_type = Some(self.build_type(inner)),
                Rule::ident => name = inner.as_str().to_string(),
                Rule::const_value => const_value = self.build_const_value(inner),
                Rule::annotation_list => annotations = Some(self.build_annotations(inner)),
                _ => {}
            }
        }
        let field_type = field_type.unwrap_or_else(|| TypeElement::scalar(location.clone(), "void"));
        FieldElement {
            uuid: Uuid::new_v4(),
            location,
            documentation,
            annotations,
            field_id,
            requiredness,
            field_type,
            name,
            const_value,
        }
    }

    // ==================== Types and values ====================

    fn build_type(&mut self, pair: Pair<Rule>) -> TypeElement {
        let location = self.location_of(&pair);
        let mut kind = TypeElementKind::Scalar(String::new());
        let mut annotations = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::base_type => {
                    if inner.as_str() == "slist" {
                        self.reporter
                            .error(&location, "slist is unsupported; use list<string> instead");
                    }
                    kind = TypeElementKind::Scalar(inner.as_str().to_string());
                }
                Rule::ident => kind = TypeElementKind::Scalar(inner.as_str().to_string()),
                Rule::list_type | Rule::set_type => {
                    let is_list = inner.as_rule() == Rule::list_type;
                    let elem = inner
                        .into_inner()
                        .find(|p| p.as_rule() == Rule::field_type)
                        .map(|p| self.build_type(p));
                    if let Some(elem) = elem {
                        kind = if is_list {
                            TypeElementKind::List(Box::new(elem))
                        } else {
                            TypeElementKind::Set(Box::new(elem))
                        };
                    }
                }
                Rule::map_type => {
                    let mut parts: Vec<TypeElement> = Vec::with_capacity(2);
                    for p in inner.into_inner() {
                        if p.as_rule() == Rule::field_type {
                            parts.push(self.build_type(p));
                        }
                    }
                    let mut parts = parts.into_iter();
                    if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
                        kind = TypeElementKind::Map {
                            key: Box::new(key),
                            value: Box::new(value),
                        };
                    }
                }
                Rule::annotation_list => annotations = Some(self.build_annotations(inner)),
                _ => {}
            }
        }
        TypeElement {
            location,
            annotations,
            kind,
        }
    }

    fn build_const_value(&mut self, pair: Pair<Rule>) -> Option<ConstValueElement> {
        let location = self.location_of(&pair);
        let thrift_text = pair.as_str().trim().to_string();
        let inner = pair.into_inner().next()?;
        let kind = match inner.as_rule() {
            Rule::integer => match parse_integer(inner.as_str()) {
                Some(v) => ConstValueKind::Int(v),
                None => {
                    self.reporter.error(
                        &location,
                        format!("Invalid integer literal: {}", inner.as_str()),
                    );
                    return None;
                }
            },
            Rule::double => match inner.as_str().parse::<f64>() {
                Ok(v) => ConstValueKind::Double(v),
                Err(_) => {
                    self.reporter.error(
                        &location,
                        format!("Invalid double literal: {}", inner.as_str()),
                    );
                    return None;
                }
            },
            Rule::literal => {
                ConstValueKind::Literal(self.unquote(&location, inner.as_str(), true))
            }
            Rule::ident => ConstValueKind::Identifier(inner.as_str().to_string()),
            Rule::const_list => {
                let mut values = Vec::new();
                for p in inner.into_inner() {
                    if p.as_rule() == Rule::const_value {
                        values.push(self.build_const_value(p)?);
                    }
                }
                ConstValueKind::List(values)
            }
            Rule::const_map => {
                let mut entries = Vec::new();
                for entry in inner.into_inner() {
                    if entry.as_rule() != Rule::const_map_entry {
                        continue;
                    }
                    let mut it = entry.into_inner();
                    let key = self.build_const_value(it.next()?)?;
                    let value = self.build_const_value(it.next()?)?;
                    entries.push((key, value));
                }
                ConstValueKind::Map(entries)
            }
            _ => return None,
        };
        Some(ConstValueElement {
            location,
            thrift_text,
            kind,
        })
    }

    fn build_annotations(&mut self, pair: Pair<Rule>) -> AnnotationElement {
        let location = self.location_of(&pair);
        let mut values = BTreeMap::new();
        for annotation in pair.into_inner() {
            if annotation.as_rule() != Rule::annotation {
                continue;
            }
            let mut key = String::new();
            let mut value = "true".to_string();
            for part in annotation.into_inner() {
                match part.as_rule() {
                    Rule::ident => key = part.as_str().to_string(),
                    Rule::literal => {
                        let loc = self.location_of(&part);
                        value = self.unquote(&loc, part.as_str(), true);
                    }
                    _ => {}
                }
            }
            values.insert(key, value);
        }
        AnnotationElement { location, values }
    }

    fn unquote(&mut self, location: &Location, literal: &str, process_escapes: bool) -> String {
        let mut chars = literal.chars();
        let quote = chars.next().unwrap_or('"');
        let body: Vec<char> = {
            let mut v: Vec<char> = chars.collect();
            if v.last() == Some(&quote) {
                v.pop();
            }
            v
        };
        let mut out = String::with_capacity(body.len());
        let mut i = 0;
        while i < body.len() {
            let c = body[i];
            i += 1;
            if !process_escapes || c != '\\' {
                out.push(c);
                continue;
            }
            let Some(&escape) = body.get(i) else {
                self.reporter.error(location, "Unterminated literal");
                break;
            };
            i += 1;
            match escape {
                'a' => out.push('\u{07}'),
                'b' => out.push('\u{08}'),
                'f' => out.push('\u{0C}'),
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                'v' => out.push('\u{0B}'),
                '\\' => out.push('\\'),
                'u' => {
                    let hex: String = body.iter().skip(i).take(4).collect();
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(ch) if hex.len() == 4 => {
                            out.push(ch);
                            i += 4;
                        }
                        _ => self
                            .reporter
                            .error(location, format!("invalid unicode escape: \\u{}", hex)),
                    }
                }
                other if other == quote => out.push(quote),
                other => self
                    .reporter
                    .error(location, format!("invalid escape character: {}", other)),
            }
        }
        out
    }
}

/// Report an error at every location whose ID is shared with another entry.
pub(crate) fn report_duplicate_ids<'l>(
    reporter: &mut ErrorReporter,
    ids: impl Iterator<Item = (i32, &'l Location)>,
    what: &str,
) {
    let entries: Vec<(i32, &Location)> = ids.collect();
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for (id, _) in &entries {
        *counts.entry(*id).or_default() += 1;
    }
    for (id, location) in entries {
        if counts[&id] > 1 {
            reporter.error(location, format!("{}: {}", what, id));
        }
    }
}

fn error_offset(e: &pest::error::Error<Rule>) -> usize {
    match e.location {
        pest::error::InputLocation::Pos(p) => p,
        pest::error::InputLocation::Span((start, _)) => start,
    }
}

fn describe_rule(rule: &Rule) -> String {
    match rule {
        Rule::ident => "identifier".to_string(),
        Rule::literal => "string literal".to_string(),
        Rule::integer => "integer".to_string(),
        Rule::field_type => "type".to_string(),
        Rule::const_value => "constant value".to_string(),
        Rule::field => "field".to_string(),
        Rule::function => "function".to_string(),
        Rule::enum_member => "enum member".to_string(),
        Rule::annotation_list => "annotations".to_string(),
        Rule::EOI => "end of input".to_string(),
        other => format!("{:?}", other),
    }
}

/// Decimal or `0x` hex, with an optional sign.
pub(crate) fn parse_integer(text: &str) -> Option<i64> {
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let magnitude = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        i128::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<i128>().ok()?
    };
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).ok()
}

fn format_doc(tokens: &[CommentToken]) -> String {
    let mut sb = String::new();
    for token in tokens {
        match token.kind {
            CommentKind::Slash => format_single_line(&mut sb, &token.text, "//"),
            CommentKind::Hash => format_single_line(&mut sb, &token.text, "#"),
            CommentKind::Block => {
                let mut block = String::new();
                format_multiline(&mut block, &token.text);
                let block = block.trim();
                if !block.is_empty() {
                    sb.push_str(block);
                    sb.push('\n');
                }
            }
        }
    }
    let doc = sb.trim_matches(|c: char| c <= ' ');
    if doc.is_empty() {
        String::new()
    } else {
        format!("{}\n", doc)
    }
}

fn format_single_line(sb: &mut String, text: &str, prefix: &str) {
    let body = text[prefix.len()..].trim();
    sb.push_str(body);
    sb.push('\n');
}

fn format_multiline(sb: &mut String, text: &str) {
    let chars: Vec<char> = text.chars().collect();
    let mut pos = 2;
    let mut start_of_line = true;
    while pos + 1 < chars.len() {
        let c = chars[pos];
        if c == '*' && chars[pos + 1] == '/' {
            sb.push('\n');
            return;
        }
        if c == '\n' {
            sb.push(c);
            start_of_line = true;
        } else if !start_of_line {
            sb.push(c);
        } else if c == '*' {
            // Drop the gutter star and one following space.
            if chars[pos + 1] == ' ' {
                pos += 1;
            }
            start_of_line = false;
        } else if !c.is_whitespace() {
            sb.push(c);
            start_of_line = false;
        }
        pos += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Location {
        Location::get("", "test.thrift")
    }

    fn parse_ok(src: &str) -> ThriftFileElement {
        parse(&loc(), src).expect("parse")
    }

    fn parse_err(src: &str) -> Vec<String> {
        let mut reporter = ErrorReporter::new();
        parse_with_reporter(&loc(), src, &mut reporter);
        assert!(reporter.has_error(), "expected errors for {:?}", src);
        reporter
            .reports()
            .iter()
            .filter(|r| r.level == crate::error::Level::Error)
            .map(|r| r.to_string())
            .collect()
    }

    #[test]
    fn parses_headers() {
        let file = parse_ok(
            r#"
include "shared.thrift"
cpp_include "foo.h"
namespace java com.example.api
namespace * example
php_namespace "Example.Php"
"#,
        );
        assert_eq!(file.includes.len(), 2);
        assert_eq!(file.includes[0].path, "shared.thrift");
        assert!(!file.includes[0].is_cpp);
        assert!(file.includes[1].is_cpp);
        let scopes: Vec<_> = file.namespaces.iter().map(|n| n.scope).collect();
        assert_eq!(
            scopes,
            vec![NamespaceScope::Java, NamespaceScope::All, NamespaceScope::Php]
        );
        assert_eq!(file.namespaces[0].namespace, "com.example.api");
    }

    #[test]
    fn jvm_namespace_cascades_to_undeclared_members() {
        let file = parse_ok("namespace jvm com.jvm\nnamespace java com.java\n");
        let kotlin = file
            .namespaces
            .iter()
            .find(|n| n.scope == NamespaceScope::Kotlin)
            .expect("kotlin inherits jvm");
        assert_eq!(kotlin.namespace, "com.jvm");
        let java: Vec<_> = file
            .namespaces
            .iter()
            .filter(|n| n.scope == NamespaceScope::Java)
            .collect();
        assert_eq!(java.len(), 1);
        assert_eq!(java[0].namespace, "com.java");
    }

    #[test]
    fn unknown_namespace_scope_is_a_warning() {
        let mut reporter = ErrorReporter::new();
        let file = parse_with_reporter(&loc(), "namespace nosuch foo.bar\n", &mut reporter);
        assert!(!reporter.has_error());
        assert_eq!(reporter.reports().len(), 1);
        assert!(file.namespaces.is_empty());
    }

    #[test]
    fn field_ids_default_to_previous_max_plus_one() {
        let file = parse_ok(
            r#"
struct S {
  i32 a;
  5: string b,
  list<i64> c;
  optional map<string, binary> d
}
"#,
        );
        let s = &file.structs[0];
        let ids: Vec<_> = s.fields.iter().map(|f| f.field_id).collect();
        assert_eq!(ids, vec![1, 5, 6, 7]);
        assert_eq!(s.fields[3].requiredness, Requiredness::Optional);
        assert_eq!(s.fields[3].field_type.name(), "map<string, binary>");
        assert_eq!(s.fields[2].field_type.name(), "list<i64>");
    }

    #[test]
    fn duplicate_field_ids_reported_at_each_field() {
        let errors = parse_err("struct S {\n  1: required i32 x;\n  1: required i32 y;\n}\n");
        assert_eq!(errors.len(), 2, "{:?}", errors);
        assert!(errors[0].contains("(2, 3)") && errors[0].contains("duplicate field ID: 1"));
        assert!(errors[1].contains("(3, 3)") && errors[1].contains("duplicate field ID: 1"));
    }

    #[test]
    fn non_positive_field_id_rejected() {
        let errors = parse_err("struct S { 0: i32 x; -2: i32 y }");
        assert_eq!(
            errors
                .iter()
                .filter(|e| e.contains("field ID must be greater than zero"))
                .count(),
            2
        );
    }

    #[test]
    fn unsupported_legacy_constructs_rejected() {
        let errors = parse_err("senum Old { \"a\", \"b\" }\n");
        assert!(errors[0].contains("'senum' is unsupported; use 'enum' instead"));
        let errors = parse_err("xsd_namespace \"http://x\"\n");
        assert!(errors[0].contains("'xsd_namespace' is unsupported"));
        let errors = parse_err("struct S { 1: slist names }\n");
        assert!(errors[0].contains("slist is unsupported"));
    }

    #[test]
    fn syntax_errors_recover_at_next_definition() {
        let errors = parse_err(
            "struct A {\n  1: i32\n}\n\nstruct B { 1: i32 ok }\n\nenum E {\n  X = ,\n}\n",
        );
        assert_eq!(errors.len(), 2, "{:?}", errors);
        assert!(errors.iter().all(|e| e.contains("Syntax error")));
        let mut reporter = ErrorReporter::new();
        let file = parse_with_reporter(
            &loc(),
            "struct A {\n  1: i32\n}\n\nstruct B { 1: i32 ok }\n",
            &mut reporter,
        );
        assert_eq!(file.structs.len(), 1);
        assert_eq!(file.structs[0].name, "B");
    }

    #[test]
    fn enum_values_increment_and_duplicates_fail() {
        let file = parse_ok("enum E { A, B = 10, C, D = 0x20 }");
        let values: Vec<_> = file.enums[0].members.iter().map(|m| m.value).collect();
        assert_eq!(values, vec![0, 10, 11, 32]);
        let errors = parse_err("enum E { A = 1, B = 1 }");
        assert!(errors[0].contains("duplicate enum value: 1"));
    }

    #[test]
    fn leading_and_trailing_documentation() {
        let file = parse_ok(
            r#"
// The first struct.
/**
 * More words.
 */
struct A {
  1: i32 x; // x doc
  // y doc
  2: i32 y;
} // trailing A

struct B {}
"#,
        );
        let a = &file.structs[0];
        assert_eq!(a.documentation, "The first struct.\nMore words.\ntrailing A\n");
        assert_eq!(a.fields[0].documentation, "x doc\n");
        assert_eq!(a.fields[1].documentation, "y doc\n");
        assert_eq!(file.structs[1].documentation, "");
    }

    #[test]
    fn trailing_comment_is_not_reused_as_leading() {
        let file = parse_ok("const i32 A = 1; # about A\nconst i32 B = 2;\n");
        assert_eq!(file.constants[0].documentation, "about A\n");
        assert_eq!(file.constants[1].documentation, "");
    }

    #[test]
    fn const_values() {
        let file = parse_ok(
            r#"
const i64 HEX = -0x10
const double D = 1.5e3
const string S = "a\tb\"c"
const list<i32> L = [1, 2; 3]
const map<string, i32> M = { "k": 1, "j": OTHER }
const Color C = Color.RED
"#,
        );
        let kinds: Vec<_> = file.constants.iter().map(|c| c.value.kind.clone()).collect();
        assert_eq!(kinds[0], ConstValueKind::Int(-16));
        assert_eq!(kinds[1], ConstValueKind::Double(1500.0));
        assert_eq!(kinds[2], ConstValueKind::Literal("a\tb\"c".to_string()));
        match &kinds[3] {
            ConstValueKind::List(items) => assert_eq!(items.len(), 3),
            other => panic!("expected list, got {:?}", other),
        }
        match &kinds[4] {
            ConstValueKind::Map(entries) => {
                assert_eq!(entries[1].1.as_identifier(), Some("OTHER"));
            }
            other => panic!("expected map, got {:?}", other),
        }
        assert_eq!(file.constants[5].value.as_identifier(), Some("Color.RED"));
    }

    #[test]
    fn invalid_escape_reported() {
        let errors = parse_err("const string S = \"a\\qb\"\n");
        assert!(errors[0].contains("invalid escape character: q"));
    }

    #[test]
    fn services_and_functions() {
        let file = parse_ok(
            r#"
service Base {}
service Svc extends Base {
  oneway void ping(),
  i32 add(1: i32 a, 2: i32 b) throws (1: Oops oops) (deprecated)
}
"#,
        );
        let svc = &file.services[1];
        assert_eq!(svc.extends_service.as_ref().map(|t| t.name()), Some("Base".to_string()));
        assert!(svc.functions[0].one_way);
        assert!(svc.functions[0].return_type.is_void());
        let add = &svc.functions[1];
        assert_eq!(add.params.len(), 2);
        assert!(add.params.iter().all(|p| p.requiredness == Requiredness::Required));
        assert_eq!(add.exceptions[0].name, "oops");
        assert_eq!(
            add.annotations.as_ref().and_then(|a| a.get("deprecated")),
            Some("true")
        );
    }

    #[test]
    fn service_cannot_extend_collection() {
        let errors = parse_err("service S extends list<i32> {}\n");
        assert!(errors[0].contains("services cannot extend collections"));
    }

    #[test]
    fn annotations_on_types_and_fields() {
        let file = parse_ok(
            "typedef list<i32> (python.immutable = \"\") Ints\nstruct S { 1: i32 x (thrifty.redacted) }\n",
        );
        let typedef = &file.typedefs[0];
        assert_eq!(typedef.new_name, "Ints");
        assert!(typedef.old_type.annotations.is_some());
        let field = &file.structs[0].fields[0];
        assert_eq!(
            field.annotations.as_ref().and_then(|a| a.get("thrifty.redacted")),
            Some("true")
        );
    }

    #[test]
    fn parse_integer_handles_signs_and_hex() {
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("-0x7f"), Some(-127));
        assert_eq!(parse_integer("+7"), Some(7));
        assert_eq!(parse_integer("-9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_integer("9223372036854775808"), None);
    }
}
