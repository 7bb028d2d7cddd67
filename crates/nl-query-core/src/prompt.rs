//! Prompt assembly for query generation, result explanation, RAG
//! answering, and model-based routing.
//!
//! Also hosts the name-based description inference used when live
//! introspection finds tables or columns without comments.

use serde_json::Value;

use crate::models::{ColumnMetadata, SchemaMetadata, TableRef, TabularResult};
use crate::store::{ScoredRecord, SourceType};

pub const GENERATION_SYSTEM_PROMPT: &str =
    "You are a SQL expert that converts natural language to SQL queries.";

pub const REASONING_SYSTEM_PROMPT: &str =
    "You are a database expert who explains SQL queries and results to non-technical users.";

pub const RAG_SYSTEM_PROMPT: &str =
    "You are a data catalog assistant. Answer questions about the available data using only the catalog entries provided.";

pub const ROUTING_SYSTEM_PROMPT: &str =
    "You classify analytics questions. Reply with JSON only.";

/// Returned in place of an explanation when reasoning generation fails.
pub const REASONING_FALLBACK: &str =
    "Reasoning generation failed. Please review the SQL query and results.";

/// Rows of the result shown to the reasoning model.
pub const REASONING_PREVIEW_ROWS: usize = 5;

/// Sample rows of each table shown to the generation model.
pub const PROMPT_SAMPLE_ROWS: usize = 3;

fn format_column(col: &ColumnMetadata) -> String {
    match col.description.as_deref().filter(|d| !d.is_empty()) {
        Some(desc) => format!("{} ({}): {}", col.name, col.data_type, desc),
        None => format!("{} ({})", col.name, col.data_type),
    }
}

/// Render one table as a prompt block.
///
/// `reference` is how the source expects the table to be written in SQL.
/// It gets its own line when it differs from the logical key.
pub fn format_table(schema: &SchemaMetadata, reference: &str) -> String {
    let columns: Vec<String> = schema.columns.iter().map(format_column).collect();
    let description = schema
        .description
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or("No description available");

    let key = schema.key();
    let mut block = format!("Table: {}", key);
    if !reference.is_empty() && reference != key {
        block.push_str(&format!("\nReference as: {}", reference));
    }
    block.push_str(&format!(
        "\nDescription: {}\nColumns:\n{}",
        description,
        columns.join("\n")
    ));
    if let Some(count) = schema.row_count {
        block.push_str(&format!("\nRow count: ~{}", count));
    }
    if let Some(rows) = schema.sample_rows.as_ref().filter(|r| !r.is_empty()) {
        block.push_str("\nSample rows:");
        for row in rows.iter().take(PROMPT_SAMPLE_ROWS) {
            block.push('\n');
            block.push_str(&Value::Array(row.clone()).to_string());
        }
    }
    block
}

/// Build the grounded query-generation prompt. `qualify` renders a table
/// the way the target source accepts it in a `FROM` clause.
pub fn build_generation_prompt(
    question: &str,
    schemas: &[SchemaMetadata],
    dialect: &str,
    qualify: &dyn Fn(&TableRef) -> String,
) -> String {
    let schema_info = if schemas.is_empty() {
        "No schema information available.".to_string()
    } else {
        schemas
            .iter()
            .map(|s| format_table(s, &qualify(&s.table_ref())))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        "You are an expert SQL translator. Given the schema information below and a natural \
language query, generate the appropriate SQL query for {dialect}.

### Schema Information
{schema_info}

### Natural Language Query
{question}

### Instructions
Refer to each table by its \"Reference as\" name when one is given.
Respond with only the {dialect} SQL statement. Do not include explanations or markdown.

### Generated SQL Query"
    )
}

/// Build the result-explanation prompt.
pub fn build_reasoning_prompt(question: &str, sql: &str, result: &TabularResult) -> String {
    let preview = if result.rows.is_empty() {
        "No rows returned".to_string()
    } else {
        let rows: Vec<Value> = result
            .rows
            .iter()
            .take(REASONING_PREVIEW_ROWS)
            .map(|r| Value::Array(r.clone()))
            .collect();
        serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
    };

    format!(
        "I executed a natural language query against a database.

Natural Language Query: \"{question}\"

The system converted it to this SQL:
```sql
{sql}
```

The results were (showing first {n} rows):
```json
{preview}
```

Please explain:
1. How the SQL query addresses the natural language request
2. What the results mean in relation to the original question
3. Any limitations or caveats about the query or results",
        n = REASONING_PREVIEW_ROWS,
    )
}

fn describe_hit(hit: &ScoredRecord) -> String {
    let p = &hit.payload;
    let table = p.table_ref().key();
    let mut line = match (p.source_type, p.column.as_deref()) {
        (SourceType::Column, Some(col)) => format!(
            "Column {}.{} ({})",
            table,
            col,
            p.data_type.as_deref().unwrap_or("unknown")
        ),
        _ => format!("Table {}", table),
    };
    if let Some(desc) = p.description.as_deref().filter(|d| !d.is_empty()) {
        line.push_str(": ");
        line.push_str(desc);
    }
    if let Some(count) = p.row_count {
        line.push_str(&format!(" (~{} rows)", count));
    }
    if let Some(text) = p.text.as_deref().filter(|t| !t.is_empty()) {
        line.push_str("\n  ");
        line.push_str(text);
    }
    line
}

/// Build the retrieval-augmented answer prompt from knowledge hits.
pub fn build_rag_prompt(question: &str, hits: &[ScoredRecord]) -> String {
    let context = if hits.is_empty() {
        "No catalog entries were found for this data source.".to_string()
    } else {
        hits.iter()
            .enumerate()
            .map(|(i, h)| format!("[{}] {}", i + 1, describe_hit(h)))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "### Catalog Entries
{context}

### Question
{question}

Answer the question using the catalog entries above. Cite entries by their [number]. \
If the entries do not contain the answer, say so."
    )
}

/// Build the prompt asking a model to choose a processing path.
pub fn build_routing_prompt(question: &str) -> String {
    format!(
        "Decide how to answer the question below.
- \"code_execution\": it needs numbers computed from tables (aggregations, filters, rankings).
- \"rag\": it asks about meaning, definitions, documentation, or what data exists.
- \"hybrid\": it needs both.

Question: \"{question}\"

Reply with JSON only, in this exact format:
{{\"path\": \"code_execution\", \"confidence\": 0.9}}"
    )
}

/// Guess a table's purpose from its name and columns.
pub fn infer_table_purpose(table: &str, columns: &[ColumnMetadata], row_count: Option<i64>) -> String {
    let name = table.to_lowercase();
    let cols: Vec<String> = columns.iter().map(|c| c.name.to_lowercase()).collect();
    let has = |n: &str| cols.iter().any(|c| c == n);
    let any_contains = |parts: &[&str]| cols.iter().any(|c| parts.iter().any(|p| c.contains(p)));

    let by_name = [
        (&["user", "customer"][..], "Contains user or customer information"),
        (&["order"][..], "Contains order information"),
        (&["product", "item"][..], "Contains product information"),
        (&["transaction"][..], "Contains transaction records"),
        (&["log"][..], "Contains log entries"),
        (&["config", "setting"][..], "Contains configuration or settings"),
    ];
    for (needles, purpose) in by_name {
        if needles.iter().any(|n| name.contains(n)) {
            return purpose.to_string();
        }
    }

    if has("id") && (has("name") || has("description") || has("title")) {
        return "Contains entity records with identifiers and descriptions".to_string();
    }

    if any_contains(&["date", "time"]) {
        return if any_contains(&["amount", "total", "price"]) {
            "Contains time-based financial or transactional records".to_string()
        } else {
            "Contains time-based records".to_string()
        };
    }

    format!(
        "Table containing {} columns and approximately {} rows",
        columns.len(),
        row_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    )
}

/// Guess a column's meaning from its name and declared type.
pub fn infer_column_description(name: &str, data_type: &str) -> String {
    let n = name.to_lowercase();
    let t = data_type.to_lowercase();

    if n == "id" || n.ends_with("_id") {
        return "Unique identifier".to_string();
    }
    let by_name: &[(fn(&str) -> bool, &str)] = &[
        (|n| n == "name" || n.ends_with("_name"), "Name or title"),
        (
            |n| n == "description" || n.ends_with("_description"),
            "Description text",
        ),
        (|n| n.contains("email"), "Email address"),
        (|n| n.contains("phone"), "Phone number"),
        (|n| n.contains("address"), "Address information"),
        (
            |n| n.contains("date") || n.contains("time") || n.ends_with("_at"),
            "Date or timestamp",
        ),
        (
            |n| ["price", "cost", "amount", "total"].iter().any(|p| n.contains(p)),
            "Monetary value or amount",
        ),
        (
            |n| n.contains("status") || n.contains("state"),
            "Status or state indicator",
        ),
        (
            |n| n.starts_with("is_") || n.starts_with("has_"),
            "Boolean flag or indicator",
        ),
    ];
    if let Some((_, desc)) = by_name.iter().find(|(pred, _)| pred(&n)) {
        return desc.to_string();
    }

    if t.contains("bool") {
        "Boolean flag or indicator".to_string()
    } else if t.contains("int") || t.contains("number") || t.contains("numeric") {
        "Numeric value".to_string()
    } else if t.contains("char") || t.contains("text") {
        "Text value".to_string()
    } else if t.contains("timestamp") {
        "Timestamp value".to_string()
    } else if t.contains("date") {
        "Date value".to_string()
    } else if t.contains("time") {
        "Time value".to_string()
    } else {
        format!("{} data column", data_type)
    }
}
