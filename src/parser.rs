//! Parse schema DSL source into AST using PEST.

use crate::ast::*;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct SchemaParser;

/// Parse schema source into AST.
pub fn parse(source: &str) -> Result<SchemaFile, String> {
    let pairs = SchemaParser::parse(Rule::schema_file, source)
        .map_err(|e| format!("Parse error: {}", e))?;
    let pair = pairs.into_iter().next().ok_or("Empty parse")?;
    build_schema_file(pair)
}

fn build_schema_file(pair: pest::iterators::Pair<Rule>) -> Result<SchemaFile, String> {
    let mut messages = Vec::new();
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::message_section {
            messages.push(build_message(inner)?);
        }
    }
    Ok(SchemaFile { messages })
}

fn build_message(pair: pest::iterators::Pair<Rule>) -> Result<MessageSection, String> {
    let mut name = String::new();
    let mut preserve_unknown = false;
    let mut fields = Vec::new();
    let mut sub_types = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::message_options => {
                for opt in inner.into_inner().flat_map(|o| o.into_inner()) {
                    if opt.as_rule() == Rule::preserve_unknown {
                        preserve_unknown = true;
                    }
                }
            }
            Rule::field_decl => fields.push(build_field(inner)?),
            Rule::subtype_decl => sub_types.push(build_subtype(inner)?),
            _ => {}
        }
    }
    if name.is_empty() {
        return Err("message section: missing name".to_string());
    }
    Ok(MessageSection {
        name,
        preserve_unknown,
        fields,
        sub_types,
    })
}

fn build_subtype(pair: pest::iterators::Pair<Rule>) -> Result<SubTypeDecl, String> {
    let mut it = pair.into_inner();
    let name = it.next().ok_or("subtype: name")?.as_str().to_string();
    let number = parse_field_number(it.next().ok_or("subtype: field number")?.as_str())?;
    Ok(SubTypeDecl { name, number })
}

fn build_field(pair: pest::iterators::Pair<Rule>) -> Result<MessageField, String> {
    let mut name = String::new();
    let mut number = None;
    let mut type_spec = None;
    let mut packed = false;
    let mut strict = false;
    let mut default = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::type_spec => type_spec = Some(build_type_spec(inner)?),
            Rule::field_number => number = Some(parse_field_number(inner.as_str())?),
            Rule::field_options => {
                for opt in inner.into_inner().flat_map(|o| o.into_inner()) {
                    match opt.as_rule() {
                        Rule::packed_opt => packed = true,
                        Rule::strict_opt => strict = true,
                        Rule::default_opt => {
                            let lit = opt.into_inner().next().ok_or("default: missing literal")?;
                            default = Some(build_literal(lit)?);
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    Ok(MessageField {
        type_spec: type_spec.ok_or_else(|| format!("field {}: missing type", name))?,
        number: number.ok_or_else(|| format!("field {}: missing field number", name))?,
        name,
        packed,
        strict,
        default,
    })
}

fn build_type_spec(pair: pest::iterators::Pair<Rule>) -> Result<TypeSpec, String> {
    let inner = pair.into_inner().next().ok_or("Empty type_spec")?;
    match inner.as_rule() {
        Rule::ident => Ok(TypeSpec::Named(inner.as_str().to_string())),
        Rule::group_type => build_group(inner),
        Rule::list_type => {
            let elem = inner.into_inner().next().ok_or("list: missing element type")?;
            Ok(TypeSpec::List(Box::new(build_elem_type(elem)?)))
        }
        Rule::map_type => {
            let mut it = inner.into_inner();
            let key = it.next().ok_or("map: missing key type")?.as_str().to_string();
            let value = build_elem_type(it.next().ok_or("map: missing value type")?)?;
            Ok(TypeSpec::Map {
                key,
                value: Box::new(value),
            })
        }
        r => Err(format!("unexpected type_spec child: {:?}", r)),
    }
}

fn build_elem_type(pair: pest::iterators::Pair<Rule>) -> Result<TypeSpec, String> {
    let inner = pair.into_inner().next().ok_or("Empty elem_type")?;
    match inner.as_rule() {
        Rule::ident => Ok(TypeSpec::Named(inner.as_str().to_string())),
        Rule::group_type => build_group(inner),
        r => Err(format!("unexpected elem_type child: {:?}", r)),
    }
}

fn build_group(pair: pest::iterators::Pair<Rule>) -> Result<TypeSpec, String> {
    let ident = pair.into_inner().next().ok_or("group<ident>: missing ident")?;
    Ok(TypeSpec::Group(ident.as_str().to_string()))
}

fn parse_field_number(s: &str) -> Result<u32, String> {
    s.parse::<u32>()
        .map_err(|_| format!("field number out of range: {}", s))
}

fn build_literal(pair: pest::iterators::Pair<Rule>) -> Result<Literal, String> {
    let inner = pair.into_inner().next().ok_or("Empty literal")?;
    let s = inner.as_str();
    match inner.as_rule() {
        Rule::bool_lit => Ok(Literal::Bool(s == "true")),
        Rule::int_lit => s
            .parse::<i64>()
            .map(Literal::Int)
            .map_err(|_| format!("integer literal out of range: {}", s)),
        Rule::hex_lit => u64::from_str_radix(&s[2..], 16)
            .map(Literal::Hex)
            .map_err(|_| format!("hex literal out of range: {}", s)),
        Rule::float_lit => s
            .parse::<f64>()
            .map(Literal::Float)
            .map_err(|_| format!("bad float literal: {}", s)),
        Rule::string_lit => Ok(Literal::String(unescape(&s[1..s.len() - 1]))),
        r => Err(format!("unexpected literal: {:?}", r)),
    }
}

/// Left-to-right so an escaped backslash never starts another escape.
fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
