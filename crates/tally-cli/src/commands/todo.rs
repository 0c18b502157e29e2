//! Todo command handlers
//!
//! Every read and write goes through the safe operations facade, so
//! failures arrive as classified `DatabaseError`s.

use anyhow::{bail, Result};
use tracing::warn;
use uuid::Uuid;

use tally_core::{retry_transient, DocumentStore, QueryParams, RetryPolicy, SafeOperations, Todo};

use crate::output::Output;

const TODOS_BY_COMPLETED: &str = "todos_by_completed";
const BY_TYPE: &str = "by_type";

/// Create a new todo
pub async fn add<S: DocumentStore>(
    ops: &SafeOperations<S>,
    title: String,
    tags: Vec<String>,
    output: &Output,
) -> Result<()> {
    let mut todo = Todo::new(title);
    for tag in tags {
        todo.add_tag(tag);
    }

    let doc = todo.to_document();
    let saved =
        retry_transient(RetryPolicy::default(), move || ops.safe_put(doc.clone())).await?;
    todo.rev = saved.rev;

    output.success(&format!("Created todo: {}", todo.id));
    output.print_todo(&todo);
    Ok(())
}

/// List open todos, or completed ones with `done`
pub async fn list<S: DocumentStore>(
    ops: &SafeOperations<S>,
    tag: Option<String>,
    done: bool,
    output: &Output,
) -> Result<()> {
    let todos = matching_todos(ops, tag.as_deref(), done).await?;
    output.print_todos(&todos);
    Ok(())
}

/// Todos with the given completion state, oldest first
async fn matching_todos<S: DocumentStore>(
    ops: &SafeOperations<S>,
    tag: Option<&str>,
    done: bool,
) -> Result<Vec<Todo>> {
    let params = &QueryParams::with_key(done).include_docs();
    let rows = retry_transient(RetryPolicy::default(), move || {
        ops.safe_query(TODOS_BY_COMPLETED, params)
    })
    .await?;

    let mut todos: Vec<Todo> = rows
        .iter()
        .filter_map(|row| row.doc.as_ref())
        .filter_map(|doc| match Todo::from_document(doc) {
            Ok(todo) => Some(todo),
            Err(e) => {
                warn!("Skipping unreadable todo {}: {}", doc.id, e);
                None
            }
        })
        .filter(|todo| tag.map_or(true, |t| todo.has_tag(t)))
        .collect();
    todos.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    Ok(todos)
}

/// Mark a todo as done
pub async fn done<S: DocumentStore>(
    ops: &SafeOperations<S>,
    id: String,
    output: &Output,
) -> Result<()> {
    let mut todo = find_todo(ops, &id).await?;
    if todo.completed {
        output.message(&format!("Already done: {}", todo.title));
        return Ok(());
    }

    todo.set_completed(true);
    let saved = ops.safe_put(todo.to_document()).await?;
    todo.rev = saved.rev;

    output.success(&format!("Completed: {}", todo.title));
    Ok(())
}

/// Delete a todo
pub async fn remove<S: DocumentStore>(
    ops: &SafeOperations<S>,
    id: String,
    output: &Output,
) -> Result<()> {
    let todo = find_todo(ops, &id).await?;
    ops.safe_remove(&todo.to_document()).await?;

    output.success(&format!("Deleted todo: {}", todo.id));
    Ok(())
}

/// Look up a todo by full UUID or unique prefix
async fn find_todo<S: DocumentStore>(ops: &SafeOperations<S>, id: &str) -> Result<Todo> {
    let uuid = resolve_todo_id(ops, id).await?;
    let doc_id = format!("todo:{}", uuid);

    match ops.safe_get(&doc_id).await? {
        Some(doc) => Ok(Todo::from_document(&doc)?),
        None => bail!("Todo not found: {}", id),
    }
}

async fn resolve_todo_id<S: DocumentStore>(ops: &SafeOperations<S>, id: &str) -> Result<Uuid> {
    // Try full UUID first
    if let Ok(uuid) = Uuid::parse_str(id) {
        return Ok(uuid);
    }

    // Try prefix match
    let rows = ops
        .safe_query(BY_TYPE, &QueryParams::with_key("todo"))
        .await?;
    let matches: Vec<&str> = rows
        .iter()
        .filter_map(|row| row.id.strip_prefix("todo:"))
        .filter(|uuid| uuid.starts_with(id))
        .collect();

    match matches.as_slice() {
        [] => bail!("No todo found matching: {}", id),
        [only] => Ok(Uuid::parse_str(only)?),
        _ => {
            eprintln!("Multiple todos match '{}':", id);
            for uuid in &matches {
                eprintln!("  {}", uuid);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}
