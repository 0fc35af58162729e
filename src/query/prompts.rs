//! Prompt templates sent to the reasoning service.

use crate::dataset::SchemaDescriptor;

pub const SQL_QUERY_LABEL: &str = "SQLQuery:";
pub const SQL_RESULT_LABEL: &str = "SQLResult:";

pub fn text_to_sql(table_name: &str, schema: &SchemaDescriptor, question: &str) -> String {
    format!(
        "You are given a table named: '{table_name}' with schema, generate only one SQL \
         SELECT query (no surrounding text) against that table to answer the given question. \
         Use only the columns listed below.\n\
         Table schema:\n{schema}\
         Question: {question}\n\n\
         {SQL_QUERY_LABEL} ",
        schema = schema.render_for_prompt(),
    )
}

pub fn synthesis(sql: &str, schema: &SchemaDescriptor, rows: &str, question: &str) -> String {
    format!(
        "Given a query, synthesize a response based on SQL query results to satisfy the query. \
         Only include details that are relevant to the query. \
         If you don't know the answer, then say that.\n\
         SQL Query: {sql}\n\
         Table Schema:\n{schema}\
         SQL Response: {rows}\n\
         Query: {question}\n\
         Response: ",
        schema = schema.render_for_prompt(),
    )
}

pub fn agent_system(table_name: &str, schema: &SchemaDescriptor) -> String {
    format!(
        "You answer questions about a table named '{table_name}' using the tools provided. \
         Call one tool at a time. Decide whether the user's input already is SQL, translate it \
         to SQL when it is not, execute the SQL, and synthesize an answer from the rows when \
         that tool is available. If execution fails, translate the question again and retry. \
         When done, reply with the final answer as plain text.\n\
         Table schema:\n{schema}",
        schema = schema.render_for_prompt(),
    )
}
