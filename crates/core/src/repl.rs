use crate::api::LibraryApi;
use crate::page::{BookPage, PageError};
use crate::render::{render_view, RenderOptions};
use std::io::{self, BufRead, Write};

/// A parsed interactive command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Quit,
    Clear,
    Show,
    Reload,
    Errors,
    Checkout,
    Review {
        rating: f64,
        description: Option<String>,
    },
    Unknown(String),
    Usage(&'static str),
}

/// Parses one input line. Slash-less commands and `:` prefixes are accepted.
pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let body = line
        .strip_prefix('/')
        .or_else(|| line.strip_prefix(':'))
        .unwrap_or(line);
    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };

    match name {
        "help" => Command::Help,
        "exit" | "quit" => Command::Quit,
        "clear" => Command::Clear,
        "show" => Command::Show,
        "reload" => Command::Reload,
        "errors" => Command::Errors,
        "checkout" => Command::Checkout,
        "review" => {
            let (raw_rating, text) = match rest.split_once(char::is_whitespace) {
                Some((rating, text)) => (rating, Some(text.trim().to_string())),
                None => (rest, None),
            };
            match raw_rating.parse::<f64>() {
                Ok(rating) => Command::Review {
                    rating,
                    description: text.filter(|t| !t.is_empty()),
                },
                Err(_) => Command::Usage("usage: /review <rating> [text]"),
            }
        }
        _ => Command::Unknown(line.to_string()),
    }
}

/// Runs an interactive session over a page, reading commands from stdin.
pub async fn run_repl<A>(page: BookPage<A>, options: RenderOptions) -> anyhow::Result<()>
where
    A: LibraryApi + 'static,
{
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut stdout = io::stdout();
    run_session(page, options, &mut input, &mut stdout).await
}

/// Interactive loop over arbitrary input and output streams.
pub async fn run_session<A, R, W>(
    mut page: BookPage<A>,
    options: RenderOptions,
    input: &mut R,
    out: &mut W,
) -> anyhow::Result<()>
where
    A: LibraryApi + 'static,
    R: BufRead,
    W: Write,
{
    if !page.is_mounted() {
        page.mount();
    }
    page.settle().await;

    writeln!(out, "Book {}", page.book_id())?;
    writeln!(out, "Type /help for commands. Use /quit to leave.")?;
    write!(out, "{}", render_view(&page.view(), options))?;

    loop {
        write!(out, "book> ")?;
        out.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Command::Help => print_help(out)?,
            Command::Quit => break,
            Command::Clear => {
                write!(out, "\x1B[2J\x1B[1;1H")?;
                out.flush()?;
            }
            Command::Show => write!(out, "{}", render_view(&page.view(), options))?,
            Command::Reload => {
                page.unmount().await;
                let session = page.session().clone();
                let book_id = page.book_id();
                page = BookPage::with_shared(page.shared_api(), book_id, session);
                page.mount();
                page.settle().await;
                write!(out, "{}", render_view(&page.view(), options))?;
            }
            Command::Errors => {
                let errors = page.unit_errors();
                if errors.is_empty() {
                    writeln!(out, "no failed units")?;
                }
                for (unit, message) in errors {
                    writeln!(out, "{unit}: {message}")?;
                }
            }
            Command::Checkout => match page.checkout().await {
                Ok(()) => {
                    page.settle().await;
                    writeln!(out, "checked out")?;
                    write!(out, "{}", render_view(&page.view(), options))?;
                }
                Err(err) => print_action_error(out, err)?,
            },
            Command::Review {
                rating,
                description,
            } => match page.submit_review(rating, description).await {
                Ok(()) => {
                    page.settle().await;
                    writeln!(out, "review submitted")?;
                    write!(out, "{}", render_view(&page.view(), options))?;
                }
                Err(err) => print_action_error(out, err)?,
            },
            Command::Usage(usage) => writeln!(out, "{usage}")?,
            Command::Unknown(raw) => writeln!(out, "unknown command: {raw}. try /help")?,
        }
    }

    page.unmount().await;
    Ok(())
}

fn print_action_error<W: Write>(out: &mut W, err: PageError) -> io::Result<()> {
    match err {
        PageError::Unauthenticated => {
            writeln!(out, "sign in first: pass --token or set the token env var")
        }
        other => writeln!(out, "error: {other}"),
    }
}

fn print_help<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "Book Page Commands")?;
    writeln!(out, "  /help                    show this help")?;
    writeln!(out, "  /quit | /exit            leave the page")?;
    writeln!(out, "  /clear                   clear terminal")?;
    writeln!(out, "  /show                    render the page again")?;
    writeln!(out, "  /reload                  reload the page from the api")?;
    writeln!(out, "  /errors                  list every failed fetch")?;
    writeln!(out, "  /checkout                check this book out")?;
    writeln!(out, "  /review <rating> [text]  leave a review")?;
    Ok(())
}
