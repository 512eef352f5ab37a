//! Template-based code generator
//!
//! Deterministic: the same language, description and requirements always
//! produce the same text. A handful of descriptions get a purpose-built
//! template; everything else gets a commented skeleton.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    JavaScript,
    Html,
    Css,
    Sql,
    Bash,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Python,
        Language::JavaScript,
        Language::Html,
        Language::Css,
        Language::Sql,
        Language::Bash,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Html => "html",
            Language::Css => "css",
            Language::Sql => "sql",
            Language::Bash => "bash",
        }
    }

    /// Prefix for a single-line comment, or `None` for block-comment languages
    fn line_comment(self) -> Option<&'static str> {
        match self {
            Language::Python | Language::Bash => Some("#"),
            Language::JavaScript => Some("//"),
            Language::Sql => Some("--"),
            Language::Html | Language::Css => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|lang| lang.name() == wanted)
            .ok_or_else(|| UnsupportedLanguage(s.to_string()))
    }
}

/// Generate code for `language` (case-insensitive name).
pub fn generate(
    language: &str,
    description: &str,
    requirements: &[String],
) -> Result<String, UnsupportedLanguage> {
    let language: Language = language.parse()?;
    Ok(render(language, description, requirements))
}

pub fn render(language: Language, description: &str, requirements: &[String]) -> String {
    let desc = description.to_lowercase();
    let body = match language {
        Language::Python => python(&desc),
        Language::JavaScript => javascript(&desc),
        Language::Html => return html(description, requirements),
        Language::Css => CSS_BASE.to_string(),
        Language::Sql => sql(&desc),
        Language::Bash => return bash(description, requirements),
    };

    let mut out = header(language, description, requirements);
    out.push_str(&body);
    out
}

fn header(language: Language, description: &str, requirements: &[String]) -> String {
    let mut lines = vec![single_line(description).to_string()];
    if !requirements.is_empty() {
        lines.push("Requirements:".to_string());
        lines.extend(requirements.iter().map(|r| format!("- {}", single_line(r))));
    }

    match language.line_comment() {
        Some(prefix) => {
            let mut out: String = lines.iter().map(|l| format!("{prefix} {l}\n")).collect();
            out.push('\n');
            out
        }
        None => format!("/* {} */\n\n", lines.join("\n   ").replace("*/", "* /")),
    }
}

fn single_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

fn mentions_sum_of_two(desc: &str) -> bool {
    desc.contains("sum") && (desc.contains("two numbers") || desc.contains("2 numbers"))
}

fn python(desc: &str) -> String {
    let template = if desc.contains("fastapi") {
        PY_FASTAPI
    } else if mentions_sum_of_two(desc) {
        PY_SUM
    } else if desc.contains("calculator") {
        PY_CALCULATOR
    } else {
        PY_MAIN
    };
    template.to_string()
}

fn javascript(desc: &str) -> String {
    if mentions_sum_of_two(desc) {
        JS_SUM.to_string()
    } else {
        JS_MAIN.to_string()
    }
}

fn sql(desc: &str) -> String {
    let wants_income_filter = desc.contains("select")
        && desc.contains("age")
        && desc.contains("income")
        && desc.contains("10000");
    if wants_income_filter {
        SQL_INCOME.to_string()
    } else {
        SQL_USERS.to_string()
    }
}

fn html(description: &str, requirements: &[String]) -> String {
    let title = escape_html(single_line(description));
    let items: String = requirements
        .iter()
        .map(|r| format!("      <li>{}</li>\n", escape_html(r)))
        .collect();
    let list = if items.is_empty() {
        String::new()
    } else {
        format!("    <ul>\n{items}    </ul>\n")
    };

    format!(
        r#"<!-- {title} -->
<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
      body {{ font-family: system-ui, sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; }}
    </style>
  </head>
  <body>
    <h1>{title}</h1>
{list}  </body>
</html>
"#
    )
}

fn bash(description: &str, requirements: &[String]) -> String {
    let mut out = String::from("#!/usr/bin/env bash\n");
    out.push_str(&header(Language::Bash, description, requirements));
    out.push_str(BASH_MAIN);
    out
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const PY_FASTAPI: &str = r#"from fastapi import FastAPI
import uvicorn

app = FastAPI(title="FastAPI Application", version="1.0.0")


@app.get("/")
def read_root():
    return {"message": "Hello, FastAPI!"}


@app.get("/api/items/{item_id}")
def read_item(item_id: int, q: str | None = None):
    return {"item_id": item_id, "q": q}


@app.post("/api/webhook")
def webhook(payload: dict):
    return {"status": "received", "payload": payload}


if __name__ == "__main__":
    uvicorn.run(app, host="0.0.0.0", port=8000)
"#;

const PY_SUM: &str = r#"def sum_two_numbers(a: float, b: float) -> float:
    """Return the sum of a and b."""
    return a + b


if __name__ == "__main__":
    try:
        first = float(input("First number: "))
        second = float(input("Second number: "))
    except ValueError:
        print("Please enter valid numbers")
    else:
        print(f"{first} + {second} = {sum_two_numbers(first, second)}")
"#;

const PY_CALCULATOR: &str = r#"class Calculator:
    def add(self, a, b):
        return a + b

    def subtract(self, a, b):
        return a - b

    def multiply(self, a, b):
        return a * b

    def divide(self, a, b):
        if b == 0:
            raise ValueError("division by zero")
        return a / b


if __name__ == "__main__":
    calc = Calculator()
    print(f"5 + 3 = {calc.add(5, 3)}")
    print(f"10 - 4 = {calc.subtract(10, 4)}")
    print(f"6 * 7 = {calc.multiply(6, 7)}")
    print(f"15 / 3 = {calc.divide(15, 3)}")
"#;

const PY_MAIN: &str = r#"def main():
    print("Hello, World!")


if __name__ == "__main__":
    main()
"#;

const JS_SUM: &str = r#"function sumTwoNumbers(a, b) {
  return a + b;
}

const first = 10;
const second = 25;
console.log(`${first} + ${second} = ${sumTwoNumbers(first, second)}`);

module.exports = { sumTwoNumbers };
"#;

const JS_MAIN: &str = r#"function main() {
  console.log("Hello, World!");
}

main();
"#;

const CSS_BASE: &str = r#"*,
*::before,
*::after {
  box-sizing: border-box;
  margin: 0;
  padding: 0;
}

body {
  font-family: system-ui, sans-serif;
  line-height: 1.6;
  color: #333;
  background-color: #f4f4f4;
}

.container {
  max-width: 1200px;
  margin: 0 auto;
  padding: 0 20px;
}

.card {
  background: #fff;
  padding: 2rem;
  border-radius: 8px;
  box-shadow: 0 2px 10px rgba(0, 0, 0, 0.1);
}
"#;

const SQL_INCOME: &str = r#"SELECT age, income
FROM users
WHERE income > 10000
ORDER BY income DESC;
"#;

const SQL_USERS: &str = r#"CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    name VARCHAR(100) NOT NULL,
    email VARCHAR(255) UNIQUE NOT NULL,
    age INTEGER,
    income DECIMAL(10, 2),
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

SELECT * FROM users WHERE income > 10000;
SELECT COUNT(*) AS total_users FROM users;
SELECT * FROM users ORDER BY created_at DESC LIMIT 10;
"#;

const BASH_MAIN: &str = r#"set -euo pipefail

main() {
  echo "Hello, World!"
}

main "$@"
"#;
