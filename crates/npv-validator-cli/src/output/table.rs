use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

use super::{format_scalar, is_scalar, payload};

/// Format output as tables: scalar fields first, then one titled table
/// per nested list or map.
pub fn print_table(value: &Value) {
    match payload(value) {
        Value::Object(map) => print_sections(map),
        Value::Array(arr) => print_array_table(arr),
        other => println!("{}", format_scalar(other)),
    }

    if let Some(Value::Array(warnings)) = value.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings.iter().filter_map(Value::as_str) {
                println!("  - {w}");
            }
        }
    }
    if let Some(Value::String(meth)) = value.get("methodology") {
        println!("\nMethodology: {meth}");
    }
}

fn print_sections(map: &Map<String, Value>) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (key, val) in map.iter().filter(|(_, v)| is_scalar(v)) {
        builder.push_record([key.as_str(), &format_scalar(val)]);
    }
    println!("{}", Table::from(builder));

    for (key, val) in map {
        match val {
            Value::Array(arr) if !arr.is_empty() => {
                println!("\n{key}:");
                print_array_table(arr);
            }
            Value::Object(inner) if !inner.is_empty() => {
                println!("\n{key}:");
                let mut builder = Builder::default();
                builder.push_record(["Key", "Value"]);
                for (k, v) in inner {
                    builder.push_record([k.as_str(), &format_scalar(v)]);
                }
                println!("{}", Table::from(builder));
            }
            _ => {}
        }
    }
}

fn print_array_table(arr: &[Value]) {
    let Some(Value::Object(first)) = arr.first() else {
        for item in arr {
            println!("{}", format_scalar(item));
        }
        return;
    };

    // Nested lists are left to the JSON output.
    let headers: Vec<&str> = first
        .iter()
        .filter(|(_, v)| is_scalar(v))
        .map(|(k, _)| k.as_str())
        .collect();
    let mut builder = Builder::default();
    builder.push_record(headers.iter().copied());
    for item in arr {
        if let Value::Object(row) = item {
            builder.push_record(
                headers
                    .iter()
                    .map(|h| row.get(*h).map(format_scalar).unwrap_or_default()),
            );
        }
    }
    println!("{}", Table::from(builder));
}
