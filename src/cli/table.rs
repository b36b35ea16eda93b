//! Table output formatting for operations, events and queue stats
//!
//! Uses comfy-table; state cells are colored with console when the terminal
//! supports it.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use console::style;

use super::output::truncate;
use crate::domain::models::{AnalysisOperation, OperationEvent, OperationState, QueueStats};
use crate::services::{CircuitState, CircuitStats};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
        .collect()
}

const fn state_color(state: OperationState) -> Color {
    match state {
        OperationState::Completed => Color::Green,
        OperationState::Generating | OperationState::PartCompleted => Color::Yellow,
        OperationState::Initialized => Color::Blue,
        OperationState::Paused => Color::Cyan,
        OperationState::Failed => Color::Red,
        OperationState::Cancelled => Color::DarkGrey,
    }
}

fn state_cell(state: OperationState) -> Cell {
    if console::colors_enabled() {
        Cell::new(state.as_str()).fg(state_color(state))
    } else {
        Cell::new(state.as_str())
    }
}

pub fn format_operations_table(operations: &[AnalysisOperation]) -> String {
    let mut table = base_table();
    table.set_header(header(&[
        "Operation", "Session", "Tier", "State", "Parts", "Retries", "Started", "Last error",
    ]));

    for op in operations {
        table.add_row(vec![
            Cell::new(&op.operation_id),
            Cell::new(truncate(&op.session_id, 20)),
            Cell::new(op.tier.as_str()),
            state_cell(op.state),
            Cell::new(format!("{}/{}", op.completed_parts, op.total_parts)),
            Cell::new(op.retry_count),
            Cell::new(op.started_at.format(TIMESTAMP_FORMAT)),
            Cell::new(op.last_error.as_deref().map_or_else(|| "-".to_string(), |e| truncate(e, 40))),
        ]);
    }
    table.to_string()
}

pub fn format_events_table(events: &[OperationEvent]) -> String {
    let mut table = base_table();
    table.set_header(header(&["#", "Event", "Part", "Transition", "Actor", "Error", "At"]));

    for event in events {
        let transition = match event.previous_state {
            Some(prev) if prev != event.new_state => format!("{prev} -> {}", event.new_state),
            Some(_) => event.new_state.to_string(),
            None => format!("-> {}", event.new_state),
        };
        let actor = event.actor_id.as_deref().map_or_else(
            || event.actor_type.as_str().to_string(),
            |id| format!("{} ({id})", event.actor_type.as_str()),
        );
        table.add_row(vec![
            Cell::new(event.id),
            Cell::new(event.event_type.as_str()),
            Cell::new(event.part_number.map_or_else(|| "-".to_string(), |p| p.to_string())),
            Cell::new(transition),
            Cell::new(actor),
            Cell::new(event.error_code.as_deref().unwrap_or("-")),
            Cell::new(event.created_at.format(TIMESTAMP_FORMAT)),
        ]);
    }
    table.to_string()
}

pub fn format_queue_stats(stats: &QueueStats) -> String {
    let mut table = base_table();
    table.set_header(header(&["Status", "Items"]));
    for (label, count) in [
        ("pending", stats.pending),
        ("  due now", stats.due_now),
        ("processing", stats.processing),
        ("completed", stats.completed),
        ("failed", stats.failed),
        ("cancelled", stats.cancelled),
    ] {
        table.add_row(vec![Cell::new(label), Cell::new(count)]);
    }
    if let Some(oldest) = stats.oldest_pending_at {
        table.add_row(vec![
            Cell::new("oldest pending"),
            Cell::new(oldest.format(TIMESTAMP_FORMAT)),
        ]);
    }
    table.to_string()
}

pub fn format_circuit_line(stats: &CircuitStats) -> String {
    let state = match stats.state {
        CircuitState::Closed => style(stats.state.as_str()).green(),
        CircuitState::HalfOpen => style(stats.state.as_str()).yellow(),
        CircuitState::Open => style(stats.state.as_str()).red().bold(),
    };
    let mut line = format!(
        "Circuit: {state} ({} consecutive, {} recent failures)",
        stats.failures, stats.recent_failures
    );
    if let Some(reset) = stats.reset_time {
        line.push_str(&format!(", retry after {}", reset.format(TIMESTAMP_FORMAT)));
    }
    line
}
