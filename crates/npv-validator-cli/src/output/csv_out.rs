use serde_json::Value;
use std::io;

use super::{format_scalar, is_scalar, payload};

/// Keys holding the primary row set, in priority order.
const ROW_KEYS: [&str; 3] = ["results", "scenarios", "issues"];

/// Write the primary row set as CSV to stdout; a map of metrics becomes
/// `metric,value` rows.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());
    let body = payload(value);

    if let Some(Value::Object(metrics)) = body.get("metrics") {
        let _ = wtr.write_record(["metric", "value"]);
        for (key, val) in metrics {
            let _ = wtr.write_record([key.as_str(), &format_scalar(val)]);
        }
    } else if let Some(rows) = ROW_KEYS
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_array))
    {
        write_array_csv(&mut wtr, rows);
    } else if let Value::Object(map) = body {
        let _ = wtr.write_record(["field", "value"]);
        for (key, val) in map.iter().filter(|(_, v)| is_scalar(v)) {
            let _ = wtr.write_record([key.as_str(), &format_scalar(val)]);
        }
    } else {
        let _ = wtr.write_record([format_scalar(body)]);
    }

    let _ = wtr.flush();
}

fn write_array_csv<W: io::Write>(wtr: &mut csv::Writer<W>, arr: &[Value]) {
    let Some(Value::Object(first)) = arr.first() else {
        for item in arr {
            let _ = wtr.write_record([format_scalar(item)]);
        }
        return;
    };

    let headers: Vec<&str> = first
        .iter()
        .filter(|(_, v)| is_scalar(v))
        .map(|(k, _)| k.as_str())
        .collect();
    let _ = wtr.write_record(&headers);
    for item in arr {
        if let Value::Object(map) = item {
            let row: Vec<String> = headers
                .iter()
                .map(|h| map.get(*h).map(format_scalar).unwrap_or_default())
                .collect();
            let _ = wtr.write_record(&row);
        }
    }
}
