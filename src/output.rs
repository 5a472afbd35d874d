//! Human-readable rendering of command results. Commands produce JSON; this
//! module reads it back and formats it for a terminal.

use std::io::IsTerminal;

use owo_colors::{OwoColorize, Style};
use serde::Deserialize;

use taskgraph::commands::{DataCommand, TaskCommand};
use taskgraph::types::{Priority, Task, TaskStatus};

use crate::Command;

#[derive(Deserialize)]
struct TreeNode {
    task: Task,
    children: Vec<TreeNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Outcome {
    task: Task,
    #[serde(default)]
    auto_completed: Vec<String>,
    #[serde(default)]
    spawned: Vec<Task>,
}

#[derive(Deserialize)]
struct Imported {
    tasks: Vec<Task>,
}

/// --no-color, then NO_COLOR, then TERM=dumb, then whether the stream is a tty.
fn color_enabled(no_color_flag: bool, is_tty: bool) -> bool {
    !no_color_flag
        && std::env::var_os("NO_COLOR").is_none()
        && std::env::var("TERM").map_or(true, |term| term != "dumb")
        && is_tty
}

struct Palette {
    enabled: bool,
}

impl Palette {
    fn style(&self, style: Style) -> Style {
        if self.enabled {
            style
        } else {
            Style::new()
        }
    }

    fn id(&self) -> Style {
        self.style(Style::new().cyan().dimmed())
    }

    fn status(&self, status: TaskStatus) -> Style {
        self.style(match status {
            TaskStatus::Todo => Style::new().yellow(),
            TaskStatus::InProgress => Style::new().blue(),
            TaskStatus::Blocked => Style::new().red(),
            TaskStatus::Completed => Style::new().green(),
            TaskStatus::Canceled => Style::new().dimmed(),
        })
    }

    fn priority(&self, priority: Priority) -> Style {
        self.style(match priority {
            Priority::High => Style::new().red(),
            Priority::Medium => Style::new().yellow(),
            Priority::Low => Style::new(),
        })
    }

    fn guide(&self) -> Style {
        self.style(Style::new().dimmed())
    }

    fn heading(&self) -> Style {
        self.style(Style::new().bold())
    }

    fn error(&self) -> Style {
        self.style(Style::new().red().bold())
    }
}

fn status_glyph(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "○",
        TaskStatus::InProgress => "◐",
        TaskStatus::Blocked => "⊘",
        TaskStatus::Completed => "✓",
        TaskStatus::Canceled => "✗",
    }
}

pub struct Printer {
    palette: Palette,
}

impl Printer {
    pub fn new(no_color_flag: bool) -> Self {
        Self {
            palette: Palette {
                enabled: color_enabled(no_color_flag, std::io::stdout().is_terminal()),
            },
        }
    }

    pub fn new_for_stderr(no_color_flag: bool) -> Self {
        Self {
            palette: Palette {
                enabled: color_enabled(no_color_flag, std::io::stderr().is_terminal()),
            },
        }
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{}", message.style(self.palette.error()));
    }

    pub fn print(&self, command: &Command, output: &str) {
        let rendered = match command {
            Command::Init => {
                println!("Initialized taskgraph database");
                return;
            }
            Command::Task(TaskCommand::Delete { .. }) => {
                println!("Task deleted");
                return;
            }
            Command::Task(TaskCommand::Tree(_)) => self.render_forest(output),
            Command::Task(TaskCommand::List(_)) => self.render_list(output),
            Command::Task(TaskCommand::Complete(_) | TaskCommand::Cancel { .. }) => {
                self.render_outcome(output)
            }
            Command::Task(_) | Command::Dep(_) => self.render_task(output),
            Command::Data(DataCommand::Import { .. }) => self.render_import(output),
            // Completions are written by main() before any result exists
            Command::Completions { .. } => unreachable!("completions handled before print()"),
        };
        if !rendered {
            println!("{output}");
        }
    }

    fn id(&self, id: &impl std::fmt::Display) -> String {
        id.to_string().style(self.palette.id()).to_string()
    }

    fn badge(&self, status: TaskStatus) -> String {
        status_glyph(status)
            .style(self.palette.status(status))
            .to_string()
    }

    /// Either one tree (`task tree <id>`) or every root's tree.
    fn render_forest(&self, output: &str) -> bool {
        let forest = match serde_json::from_str::<TreeNode>(output) {
            Ok(tree) => vec![tree],
            Err(_) => match serde_json::from_str::<Vec<TreeNode>>(output) {
                Ok(trees) => trees,
                Err(_) => return false,
            },
        };
        if forest.is_empty() {
            println!("No tasks found");
            return true;
        }

        let mut tally = Tally::default();
        for (i, tree) in forest.iter().enumerate() {
            if i > 0 {
                println!();
            }
            tally.count_tree(tree);
            self.render_root(&tree.task);
            self.render_children(&tree.children, "");
        }
        self.render_tally(&tally);
        true
    }

    fn render_root(&self, task: &Task) {
        println!(
            "{} {} {}",
            self.badge(task.status),
            task.title.style(self.palette.heading()),
            self.id(&task.id)
        );
    }

    fn render_children(&self, children: &[TreeNode], indent: &str) {
        for (i, node) in children.iter().enumerate() {
            let last = i + 1 == children.len();
            let (branch, rail) = if last { ("└── ", "    ") } else { ("├── ", "│   ") };
            println!(
                "{}{} {} {}",
                format!("{indent}{branch}").style(self.palette.guide()),
                self.badge(node.task.status),
                node.task.title,
                self.id(&node.task.id)
            );
            self.render_children(&node.children, &format!("{indent}{rail}"));
        }
    }

    fn render_list(&self, output: &str) -> bool {
        let Ok(tasks) = serde_json::from_str::<Vec<Task>>(output) else {
            return false;
        };
        if tasks.is_empty() {
            println!("No tasks found");
            return true;
        }

        let mut tally = Tally::default();
        for task in &tasks {
            tally.count(task.status);
            println!(
                "{} {} {} [{}]",
                self.badge(task.status),
                self.id(&task.id),
                task.title,
                task.priority.style(self.palette.priority(task.priority))
            );
        }
        self.render_tally(&tally);
        true
    }

    fn render_tally(&self, tally: &Tally) {
        println!();
        println!(
            "{}/{} done, {} in progress, {} blocked, {} todo",
            tally.done.style(self.palette.status(TaskStatus::Completed)),
            tally.total,
            tally.in_progress.style(self.palette.status(TaskStatus::InProgress)),
            tally.blocked.style(self.palette.status(TaskStatus::Blocked)),
            tally.todo.style(self.palette.status(TaskStatus::Todo)),
        );
    }

    fn render_outcome(&self, output: &str) -> bool {
        let Ok(outcome) = serde_json::from_str::<Outcome>(output) else {
            return false;
        };
        self.render_details(&outcome.task);
        for id in &outcome.auto_completed {
            println!("  auto-completed parent {}", self.id(id));
        }
        for next in &outcome.spawned {
            match next.due_at {
                Some(due) => println!(
                    "  next occurrence {} due {}",
                    self.id(&next.id),
                    due.format("%Y-%m-%d")
                ),
                None => println!("  next occurrence {}", self.id(&next.id)),
            }
        }
        true
    }

    fn render_import(&self, output: &str) -> bool {
        let Ok(imported) = serde_json::from_str::<Imported>(output) else {
            return false;
        };
        println!("Imported {} tasks", imported.tasks.len());
        for task in &imported.tasks {
            println!("  {} {} {}", self.badge(task.status), self.id(&task.id), task.title);
        }
        true
    }

    fn render_task(&self, output: &str) -> bool {
        let Ok(task) = serde_json::from_str::<Task>(output) else {
            return false;
        };
        self.render_details(&task);
        true
    }

    fn render_details(&self, task: &Task) {
        println!(
            "{} {} ({})",
            self.badge(task.status),
            task.title.style(self.palette.heading()),
            task.status.style(self.palette.status(task.status))
        );
        println!("  id        {}", self.id(&task.id));
        println!(
            "  priority  {}",
            task.priority.style(self.palette.priority(task.priority))
        );
        if let Some(description) = &task.description {
            println!("  about     {description}");
        }
        if let Some(parent) = &task.parent_id {
            println!("  parent    {}", self.id(parent));
        }
        if let Some(due) = task.due_at {
            println!("  due       {}", due.to_rfc3339());
        }
        if let Some(minutes) = task.estimated_duration_minutes {
            println!("  estimate  {minutes}m");
        }
        if let (Some(start), Some(end)) = (task.scheduled_start, task.scheduled_end) {
            println!(
                "  scheduled {} .. {}",
                start.format("%Y-%m-%d %H:%M"),
                end.format("%Y-%m-%d %H:%M")
            );
        }
        if let Some(pattern) = &task.recurrence {
            let until = pattern
                .end_date
                .map(|end| format!(" until {}", end.format("%Y-%m-%d")))
                .unwrap_or_default();
            println!(
                "  repeats   {:?} x{} from {}{}",
                pattern.kind,
                pattern.interval,
                pattern.start_date.format("%Y-%m-%d"),
                until
            );
        }
        if !task.blocked_by.is_empty() {
            println!("  waits on  {}", self.id_list(&task.blocked_by));
        }
        if !task.blocks.is_empty() {
            println!("  blocks    {}", self.id_list(&task.blocks));
        }
    }

    fn id_list(&self, ids: &[impl std::fmt::Display]) -> String {
        ids.iter().map(|id| self.id(id)).collect::<Vec<_>>().join(", ")
    }
}

#[derive(Default)]
struct Tally {
    total: usize,
    done: usize,
    in_progress: usize,
    blocked: usize,
    todo: usize,
}

impl Tally {
    fn count(&mut self, status: TaskStatus) {
        self.total += 1;
        let bucket = match status {
            TaskStatus::Completed | TaskStatus::Canceled => &mut self.done,
            TaskStatus::InProgress => &mut self.in_progress,
            TaskStatus::Blocked => &mut self.blocked,
            TaskStatus::Todo => &mut self.todo,
        };
        *bucket += 1;
    }

    fn count_tree(&mut self, node: &TreeNode) {
        self.count(node.task.status);
        node.children.iter().for_each(|child| self.count_tree(child));
    }
}
