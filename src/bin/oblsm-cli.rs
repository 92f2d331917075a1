//! Interactive REPL front-end over the engine, not part of its core API.
//! Grammar: `open <dir>`, `close`, `set "k" "v"`, `get "k"`, `delete "k"`,
//! `scan [-|"k1"] [-|"k2"]`, `help`, `exit`.

use std::ops::Bound;
use std::path::PathBuf;

use bytes::Bytes;
use clap::Parser;
use oblsm::{Error, ObLsm, ObLsmOptions, ObLsmReadOptions, Result};
use rustyline::DefaultEditor;

#[derive(Debug)]
enum Command {
    Open { dir: String },
    Close,
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    Scan { lower: Option<String>, upper: Option<String> },
    Help,
    Exit,
}

impl Command {
    /// Parses one REPL line using `nom` combinators.
    fn parse(input: &str) -> Result<Self> {
        use nom::branch::alt;
        use nom::bytes::complete::{tag_no_case, take_till1};
        use nom::character::complete::{char, space1};
        use nom::combinator::{map, opt};
        use nom::sequence::{delimited, tuple};

        let path = |i| map(take_till1(|c: char| c.is_whitespace()), |s: &str| s.to_string())(i);
        let quoted = |i| {
            delimited(
                char('"'),
                map(take_till1(|c| c == '"'), |s: &str| s.to_string()),
                char('"'),
            )(i)
        };
        let bound = |i| alt((map(tag_no_case("-"), |_: &str| "-".to_string()), quoted))(i);

        let open = map(tuple((tag_no_case("open"), space1, path)), |(_, _, dir)| Command::Open { dir });
        let set = map(
            tuple((tag_no_case("set"), space1, quoted, space1, quoted)),
            |(_, _, key, _, value)| Command::Set { key, value },
        );
        let get = map(tuple((tag_no_case("get"), space1, quoted)), |(_, _, key)| Command::Get { key });
        let delete = map(tuple((tag_no_case("delete"), space1, quoted)), |(_, _, key)| Command::Delete { key });
        let scan = map(
            tuple((tag_no_case("scan"), opt(tuple((space1, bound, space1, bound))))),
            |(_, args)| {
                let (lower, upper) = args.map_or((None, None), |(_, lo, _, hi)| (Some(lo), Some(hi)));
                Command::Scan { lower, upper }
            },
        );

        let mut command = alt((
            open,
            set,
            get,
            delete,
            scan,
            map(tag_no_case("close"), |_| Command::Close),
            map(tag_no_case("help"), |_| Command::Help),
            map(tag_no_case("exit"), |_| Command::Exit),
        ));

        command(input.trim())
            .map(|(_, c)| c)
            .map_err(|e| Error::InvalidArgument(format!("malformed command: {e}")))
    }
}

fn bound_of(arg: &Option<String>) -> Bound<Vec<u8>> {
    match arg.as_deref() {
        None | Some("-") => Bound::Unbounded,
        Some(s) => Bound::Included(s.as_bytes().to_vec()),
    }
}

struct Repl {
    editor: DefaultEditor,
    prompt: String,
    db: Option<ObLsm>,
}

impl Repl {
    fn run(mut self) -> Result<()> {
        loop {
            let input = match self.editor.readline(&self.prompt) {
                Ok(line) => line,
                Err(_) => break,
            };
            if input.trim().is_empty() {
                continue;
            }
            let command = match Command::parse(&input) {
                Ok(c) => c,
                Err(e) => {
                    println!("error: {e}");
                    continue;
                }
            };
            if matches!(command, Command::Exit) {
                if let Some(db) = &self.db {
                    db.close()?;
                }
                break;
            }
            if let Err(e) = self.handle(&command) {
                println!("error: {e}");
            }
        }
        Ok(())
    }

    fn handle(&mut self, command: &Command) -> Result<()> {
        match command {
            Command::Open { dir } => {
                self.db = Some(ObLsm::open(PathBuf::from(dir), ObLsmOptions::default())?);
                println!("opened {dir}");
            }
            Command::Close => {
                if let Some(db) = self.db.take() {
                    db.close()?;
                    println!("closed");
                } else {
                    println!("no database open");
                }
            }
            Command::Set { key, value } => {
                self.db()?.put(key.as_bytes(), value.as_bytes())?;
                println!("ok");
            }
            Command::Get { key } => match self.db()?.get(key.as_bytes())? {
                Some(v) => println!("{:?}", Bytes::copy_from_slice(&v)),
                None => println!("(not found)"),
            },
            Command::Delete { key } => {
                self.db()?.remove(key.as_bytes())?;
                println!("ok");
            }
            Command::Scan { lower, upper } => {
                let lower = bound_of(lower);
                let upper = bound_of(upper);
                let mut iter = self.db()?.scan(lower, upper, ObLsmReadOptions::default())?;
                let mut count = 0;
                while iter.valid() {
                    println!(
                        "{:?}={:?}",
                        Bytes::copy_from_slice(iter.key()),
                        Bytes::copy_from_slice(iter.value())
                    );
                    iter.next()?;
                    count += 1;
                }
                println!("{count} keys scanned");
            }
            Command::Help => {
                println!(
                    "commands: open <dir> | close | set \"k\" \"v\" | get \"k\" | \
                     delete \"k\" | scan [-|\"k1\"] [-|\"k2\"] | help | exit"
                );
            }
            Command::Exit => unreachable!("handled in run()"),
        }
        Ok(())
    }

    fn db(&self) -> Result<&ObLsm> {
        self.db.as_ref().ok_or(Error::InvalidArgument("no database open, run `open <dir>` first".into()))
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "oblsm interactive CLI", long_about = None)]
struct Args {
    /// Open this directory immediately instead of waiting for `open`.
    #[arg(long)]
    path: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let db = match args.path {
        Some(path) => Some(ObLsm::open(path, ObLsmOptions::default())?),
        None => None,
    };

    let editor = DefaultEditor::new().map_err(|e| Error::Internal(e.to_string()))?;
    let repl = Repl {
        editor,
        prompt: "oblsm> ".to_string(),
        db,
    };
    repl.run()?;
    Ok(())
}
