use std::io;

use console::Term;

/// Ask a yes/no question on `term`; an empty answer means no.
pub fn confirm(term: &Term, question: &str) -> io::Result<bool> {
    loop {
        term.write_str(&format!("{question} <y/N> : "))?;
        if let Some(answer) = parse_answer(&term.read_line()?) {
            return Ok(answer);
        }
    }
}

fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "1" => Some(true),
        "" | "n" | "no" | "f" | "false" | "0" => Some(false),
        _ => None,
    }
}
