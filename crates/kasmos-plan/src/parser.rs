//! Plan markdown parser.
//!
//! `## Wave <n>` headers partition the document into waves; `### Task <n>:
//! <title>` headers define tasks inside a wave. Everything above the first
//! wave header is the plan header, reused as context prefix for task prompts.
//! Parsing is pure and never fails: a document without wave headers simply
//! yields zero waves, which the caller treats as "requires re-planning".

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Plan {
    pub header: String,
    pub waves: Vec<Wave>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    pub number: u32,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub number: u32,
    pub title: String,
    pub body: String,
}

impl Plan {
    /// The plan header, trimmed, for inclusion in task prompts.
    pub fn header_context(&self) -> &str {
        self.header.trim()
    }

    pub fn total_tasks(&self) -> usize {
        self.waves.iter().map(|wave| wave.tasks.len()).sum()
    }
}

pub fn parse_plan(content: &str) -> Plan {
    let mut plan = Plan::default();
    let mut header_lines: Vec<&str> = Vec::new();
    let mut current_wave: Option<Wave> = None;
    let mut current_task: Option<Task> = None;

    for line in content.lines() {
        if let Some(number) = parse_wave_header(line) {
            finish_task(&mut current_wave, &mut current_task);
            if let Some(wave) = current_wave.take() {
                plan.waves.push(wave);
            }
            current_wave = Some(Wave {
                number,
                tasks: Vec::new(),
            });
            continue;
        }

        if let Some((number, title)) = parse_task_header(line) {
            // Tasks outside any wave are ignored; the plan needs re-planning.
            if current_wave.is_some() {
                finish_task(&mut current_wave, &mut current_task);
                current_task = Some(Task {
                    number,
                    title,
                    body: String::new(),
                });
            }
            continue;
        }

        match (&mut current_task, &current_wave) {
            (Some(task), _) => {
                if !task.body.is_empty() {
                    task.body.push('\n');
                }
                task.body.push_str(line);
            }
            (None, Some(_)) => {} // wave preamble between header and first task
            (None, None) => header_lines.push(line),
        }
    }

    finish_task(&mut current_wave, &mut current_task);
    if let Some(wave) = current_wave.take() {
        plan.waves.push(wave);
    }

    plan.header = header_lines.join("\n");
    for wave in &mut plan.waves {
        for task in &mut wave.tasks {
            task.body = task.body.trim().to_string();
        }
    }
    plan
}

fn finish_task(wave: &mut Option<Wave>, task: &mut Option<Task>) {
    if let (Some(wave), Some(task)) = (wave.as_mut(), task.take()) {
        wave.tasks.push(task);
    }
}

fn parse_wave_header(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("## Wave ")?;
    leading_number(rest)
}

fn parse_task_header(line: &str) -> Option<(u32, String)> {
    let rest = line.strip_prefix("### Task ")?;
    let (number_raw, title) = rest.split_once(':')?;
    let number = number_raw.trim().parse::<u32>().ok()?;
    Some((number, title.trim().to_string()))
}

fn leading_number(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().take_while(char::is_ascii_digit).collect();
    digits.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::parse_plan;

    const SAMPLE: &str = "\
# Auth rework

**Goal:** replace the session middleware.

## Wave 1

### Task 1: Add token store

Create the table.
Wire it up.

### Task 2: Port login handler

Swap the middleware.

## Wave 2

### Task 3: Remove legacy sessions

Delete the old path.
";

    #[test]
    fn parses_waves_tasks_and_header() {
        let plan = parse_plan(SAMPLE);

        assert!(plan.header.contains("# Auth rework"));
        assert!(plan.header.contains("**Goal:**"));
        assert_eq!(plan.waves.len(), 2);

        let wave1 = &plan.waves[0];
        assert_eq!(wave1.number, 1);
        assert_eq!(wave1.tasks.len(), 2);
        assert_eq!(wave1.tasks[0].number, 1);
        assert_eq!(wave1.tasks[0].title, "Add token store");
        assert_eq!(wave1.tasks[0].body, "Create the table.\nWire it up.");
        assert_eq!(wave1.tasks[1].number, 2);

        let wave2 = &plan.waves[1];
        assert_eq!(wave2.number, 2);
        assert_eq!(wave2.tasks.len(), 1);
        assert_eq!(wave2.tasks[0].number, 3);
        assert_eq!(plan.total_tasks(), 3);
    }

    #[test]
    fn plan_without_wave_headers_yields_zero_waves() {
        let plan = parse_plan("# Plan\n\n**Goal:** Test\n\n### Task 1: Something\n\nDo it.\n");
        assert!(plan.waves.is_empty());
        assert!(plan.header.contains("# Plan"));
    }

    #[test]
    fn empty_document_parses_to_empty_plan() {
        let plan = parse_plan("");
        assert!(plan.waves.is_empty());
        assert_eq!(plan.header_context(), "");
    }

    #[test]
    fn header_context_is_trimmed() {
        let plan = parse_plan("# Title\n\n\n## Wave 1\n### Task 1: X\nbody\n");
        assert_eq!(plan.header_context(), "# Title");
    }

    #[test]
    fn wave_header_with_trailing_text_still_parses_number() {
        let plan = parse_plan("## Wave 2 — cleanup\n### Task 4: Y\nbody\n");
        assert_eq!(plan.waves.len(), 1);
        assert_eq!(plan.waves[0].number, 2);
    }

    #[test]
    fn malformed_task_headers_become_body_text() {
        let plan = parse_plan("## Wave 1\n### Task one: no number\n### Task 2: Real\nbody\n");
        assert_eq!(plan.waves[0].tasks.len(), 1);
        assert_eq!(plan.waves[0].tasks[0].number, 2);
    }

    #[test]
    fn parse_is_idempotent_on_reparse() {
        let first = parse_plan(SAMPLE);
        let second = parse_plan(SAMPLE);
        assert_eq!(first, second);
    }
}
