//! Resource commands: list, get, create, update, delete

use super::{connect, report};
use crate::cache::keys::{Filters, ItemId};
use crate::client::Resource;
use crate::config::Config;
use crate::error::{Result, WorkdeskError};
use crate::resources::ResourceSpec;
use colored::Colorize;
use prettytable::{format, Cell, Row, Table};
use serde_json::Value;

/// Most columns shown in a list table.
const MAX_COLUMNS: usize = 6;

/// Longest cell text before truncation.
const MAX_CELL_WIDTH: usize = 40;

/// List items of a kind, filtered or unpaged
pub async fn list(
    config: &Config,
    kind: &str,
    filters: Vec<(String, String)>,
    all: bool,
) -> Result<()> {
    let client = connect(config)?;
    let resource = resolve(&client, kind)?;

    let body = if all {
        resource.get_all().await
    } else {
        resource.list(build_filters(filters)).await
    }
    .map_err(report)?;

    print_items(kind, &body);
    Ok(())
}

/// Show a single item
pub async fn get(config: &Config, kind: &str, id: &str) -> Result<()> {
    let client = connect(config)?;
    let resource = resolve(&client, kind)?;
    let body = resource.get(ItemId::parse(id)).await.map_err(report)?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Create an item from a JSON body
pub async fn create(config: &Config, kind: &str, data: &str) -> Result<()> {
    let body = parse_body(data)?;
    let client = connect(config)?;
    let resource = resolve(&client, kind)?;
    let created = resource.create(body).await.map_err(report)?;
    println!("{}", format!("Created {}", singular(kind)).green());
    print_if_present(&created)
}

/// Update an item with a JSON body
pub async fn update(config: &Config, kind: &str, id: &str, data: &str) -> Result<()> {
    let body = parse_body(data)?;
    let client = connect(config)?;
    let resource = resolve(&client, kind)?;
    let updated = resource
        .update(ItemId::parse(id), body)
        .await
        .map_err(report)?;
    println!("{}", format!("Updated {} {}", singular(kind), id).green());
    print_if_present(&updated)
}

/// Delete an item
pub async fn delete(config: &Config, kind: &str, id: &str) -> Result<()> {
    let client = connect(config)?;
    let resource = resolve(&client, kind)?;
    resource.delete(ItemId::parse(id)).await.map_err(report)?;
    println!("{}", format!("Deleted {} {}", singular(kind), id).green());
    Ok(())
}

fn resolve<'a>(client: &'a crate::client::WorkdeskClient, kind: &str) -> Result<Resource<'a>> {
    ResourceSpec::by_name(kind)
        .and_then(|spec| client.resource(&spec.kind))
        .ok_or_else(|| {
            let known: Vec<&str> = ResourceSpec::all().iter().map(|s| s.kind.as_str()).collect();
            WorkdeskError::InvalidInput(format!(
                "Unknown resource kind: {}. Must be one of: {}",
                kind,
                known.join(", ")
            ))
            .into()
        })
}

/// Builds filters from `name=value` pairs. Values that read as JSON
/// scalars (numbers, booleans) keep their type; everything else is text.
fn build_filters(pairs: Vec<(String, String)>) -> Filters {
    pairs.into_iter().fold(Filters::new(), |filters, (name, raw)| {
        let value = match serde_json::from_str::<Value>(&raw) {
            Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
            _ => Value::String(raw),
        };
        filters.with(name, value)
    })
}

fn parse_body(data: &str) -> Result<Value> {
    match serde_json::from_str::<Value>(data) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(WorkdeskError::InvalidInput("--data must be a JSON object".to_string()).into()),
        Err(e) => Err(WorkdeskError::InvalidInput(format!("Invalid JSON in --data: {}", e)).into()),
    }
}

fn singular(kind: &str) -> &str {
    kind.strip_suffix('s').unwrap_or(kind)
}

fn print_if_present(body: &Value) -> Result<()> {
    if !body.is_null() {
        println!("{}", serde_json::to_string_pretty(body)?);
    }
    Ok(())
}

/// The item array inside a list response: the body itself, or the array
/// under a `data`, `content` or `items` field.
fn items_of(body: &Value) -> Option<&Vec<Value>> {
    match body {
        Value::Array(items) => Some(items),
        Value::Object(map) => ["data", "content", "items"]
            .iter()
            .find_map(|field| map.get(*field))
            .and_then(items_of),
        _ => None,
    }
}

/// Column names for a table: scalar fields of the first item, `id` first.
fn columns_of(items: &[Value]) -> Vec<String> {
    let Some(Value::Object(first)) = items.first() else {
        return Vec::new();
    };
    let mut columns: Vec<String> = first
        .iter()
        .filter(|(_, v)| !v.is_object() && !v.is_array())
        .map(|(k, _)| k.clone())
        .collect();
    if let Some(pos) = columns.iter().position(|c| c == "id") {
        let id = columns.remove(pos);
        columns.insert(0, id);
    }
    columns.truncate(MAX_COLUMNS);
    columns
}

fn cell_text(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    if text.chars().count() > MAX_CELL_WIDTH {
        let cut: String = text.chars().take(MAX_CELL_WIDTH - 3).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

fn print_items(kind: &str, body: &Value) {
    let Some(items) = items_of(body) else {
        println!("{}", serde_json::to_string_pretty(body).unwrap_or_default());
        return;
    };
    if items.is_empty() {
        println!("{}", format!("No {} found.", kind).yellow());
        return;
    }

    let columns = columns_of(items);
    if columns.is_empty() {
        println!("{}", serde_json::to_string_pretty(body).unwrap_or_default());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(Row::new(
        columns
            .iter()
            .map(|c| Cell::new(&c.bold().to_string()))
            .collect(),
    ));
    for item in items {
        table.add_row(Row::new(
            columns
                .iter()
                .map(|c| Cell::new(&cell_text(item.get(c))))
                .collect(),
        ));
    }

    println!();
    table.printstd();
    println!("{} {}", items.len(), kind);
}
