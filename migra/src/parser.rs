use thiserror::Error;

const SQL_COMMENT_PREFIX: &str = "--";
const COMMAND_PREFIX: &str = "-- +migrate";
const OPTION_NO_TRANSACTION: &str = "no_transaction";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("statement must be ended by a semicolon")]
    NoSemicolon,

    #[error("incomplete migration command")]
    IncompleteCommand,

    #[error("unknown migration command `{0}`")]
    UnknownCommand(String),

    #[error("statement was started but not ended")]
    StatementNotEnded,

    #[error("statement was ended but not started")]
    StatementNotStarted,

    #[error("no up and down commands found during parsing")]
    NoUpDownCommands,
}

/// Up and down SQL statements of one migration file, with the
/// per-direction transaction flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMigration {
    pub up_statements: Vec<String>,
    pub down_statements: Vec<String>,

    pub no_transaction_up: bool,
    pub no_transaction_down: bool,
}

/// Splits an annotated migration file into up and down statement sets.
///
/// Lines are scanned one at a time: `-- +migrate` directives switch the
/// collection direction or open/close a multi-statement block, ordinary
/// lines accumulate into the current statement, and a statement flushes on
/// its terminating semicolon or on `statement_end`.
pub fn parse(text: &str) -> Result<ParsedMigration, ParseError> {
    let mut parser = Parser::default();

    for line in text.lines() {
        parser.line(line)?;
    }

    parser.finish()
}

#[derive(Default, PartialEq)]
enum Direction {
    #[default]
    None,
    Up,
    Down,
}

#[derive(Default, PartialEq)]
enum Statement {
    #[default]
    None,
    Started,
    Ended,
}

#[derive(Default)]
struct Parser {
    buffer: String,
    direction: Direction,
    statement: Statement,
    result: ParsedMigration,
}

impl Parser {
    fn line(&mut self, line: &str) -> Result<(), ParseError> {
        if is_empty(line) || is_sql_comment(line) {
            return Ok(());
        }

        if let Some(rest) = line.strip_prefix(COMMAND_PREFIX) {
            self.command(rest)?;
        } else {
            self.buffer.push_str(line);
            self.buffer.push('\n');
        }

        if self.statement == Statement::Ended
            || (self.statement == Statement::None && ends_with_semicolon(line))
        {
            self.flush();
        }

        Ok(())
    }

    fn command(&mut self, rest: &str) -> Result<(), ParseError> {
        let mut fields = rest.split_whitespace();
        let body = fields.next().ok_or(ParseError::IncompleteCommand)?;
        let options: Vec<&str> = fields.collect();

        match body.to_ascii_lowercase().as_str() {
            "up" => {
                if !self.buffer.is_empty() {
                    return Err(ParseError::NoSemicolon);
                }
                self.direction = Direction::Up;
                if has_option(&options, OPTION_NO_TRANSACTION) {
                    self.result.no_transaction_up = true;
                }
            }

            "down" => {
                if !self.buffer.is_empty() {
                    return Err(ParseError::NoSemicolon);
                }
                self.direction = Direction::Down;
                if has_option(&options, OPTION_NO_TRANSACTION) {
                    self.result.no_transaction_down = true;
                }
            }

            "statement_begin" | "statementbegin" => self.statement = Statement::Started,

            "statement_end" | "statementend" => {
                if self.statement != Statement::Started {
                    return Err(ParseError::StatementNotStarted);
                }
                self.statement = Statement::Ended;
            }

            _ => return Err(ParseError::UnknownCommand(body.to_owned())),
        }

        Ok(())
    }

    fn flush(&mut self) {
        let statement = std::mem::take(&mut self.buffer);

        match self.direction {
            Direction::Up => self.result.up_statements.push(statement),
            _ => self.result.down_statements.push(statement),
        }

        self.statement = Statement::None;
    }

    fn finish(self) -> Result<ParsedMigration, ParseError> {
        if self.statement == Statement::Started {
            return Err(ParseError::StatementNotEnded);
        }
        if self.direction == Direction::None {
            return Err(ParseError::NoUpDownCommands);
        }
        if !self.buffer.is_empty() {
            return Err(ParseError::NoSemicolon);
        }

        Ok(self.result)
    }
}

fn has_option(options: &[&str], option: &str) -> bool {
    options.iter().any(|o| o.eq_ignore_ascii_case(option))
}

fn is_empty(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_sql_comment(line: &str) -> bool {
    line.starts_with(SQL_COMMENT_PREFIX) && !line.starts_with(COMMAND_PREFIX)
}

/// Ignores a trailing line comment and surrounding whitespace, so
/// `SELECT 1; -- done` still terminates the statement.
fn ends_with_semicolon(line: &str) -> bool {
    let line = match line.find(SQL_COMMENT_PREFIX) {
        Some(idx) => &line[..idx],
        None => line,
    };

    line.trim_end().ends_with(';')
}
