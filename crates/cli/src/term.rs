//! Interactive terminal prompts.

use std::io::BufRead;

use crate::errors::{HarvesterError, Result};

/// Read a 1-based selection between 1 and `table_size` from the reader,
/// re-prompting on anything else.
pub fn selection_from_input(reader: &mut impl BufRead, table_size: usize) -> Result<usize> {
    let err_message = format!("Invalid input, enter a number between 1 and {table_size}: ");
    loop {
        let mut input = String::new();
        let n = reader
            .read_line(&mut input)
            .map_err(|e| HarvesterError::validation(format!("reading selection: {e}")))?;
        if n == 0 {
            return Err(HarvesterError::validation("no selection was made"));
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        match input.parse::<usize>() {
            Ok(i) if i >= 1 && i <= table_size => return Ok(i),
            _ => {
                eprint!("{err_message}");
                continue;
            }
        }
    }
}

/// Ask a yes/no question on stdin, re-prompting until an answer is given.
pub fn confirm(reader: &mut impl BufRead) -> Result<bool> {
    loop {
        let mut input = String::new();
        let n = reader
            .read_line(&mut input)
            .map_err(|e| HarvesterError::validation(format!("reading confirmation: {e}")))?;
        if n == 0 {
            return Ok(false);
        }
        match input.trim().to_lowercase().as_str() {
            "yes" | "y" => return Ok(true),
            "no" | "n" => return Ok(false),
            _ => eprint!("Please type 'yes' or 'no': "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_accepts_in_range_numbers() {
        let mut input = std::io::Cursor::new(b"2\n".to_vec());
        assert_eq!(selection_from_input(&mut input, 3).unwrap(), 2);
    }

    #[test]
    fn test_selection_reprompts_on_garbage() {
        let mut input = std::io::Cursor::new(b"zero\n0\n9\n3\n".to_vec());
        assert_eq!(selection_from_input(&mut input, 3).unwrap(), 3);
    }

    #[test]
    fn test_selection_errors_on_eof() {
        let mut input = std::io::Cursor::new(Vec::new());
        assert!(selection_from_input(&mut input, 3).is_err());
    }

    #[test]
    fn test_confirm_parses_variants() {
        let mut input = std::io::Cursor::new(b"maybe\nYES\n".to_vec());
        assert!(confirm(&mut input).unwrap());
        let mut input = std::io::Cursor::new(b"n\n".to_vec());
        assert!(!confirm(&mut input).unwrap());
    }
}
