//! Command-line front end
//!
//! `rcurl get URL` and `rcurl post URL` issue one request each, with
//! flags for extra headers, verbose output, writing the body to a file,
//! a request body from the command line or a file, and redirect
//! following.

use crate::http::{self, Error, Method, Request, Response};
use clap::{Args, Parser, Subcommand};
use log::debug;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

/// Redirects followed with `-L` before giving up
const MAX_REDIRECTS: usize = 5;

const EXIT_OK: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

#[derive(Parser)]
#[command(name = "rcurl", version, about = "HTTP/1.1 client speaking raw TCP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Perform an HTTP GET request on URL
    Get(RequestArgs),
    /// Perform an HTTP POST request on URL
    Post(PostArgs),
}

#[derive(Args)]
struct RequestArgs {
    /// Target URL (http or https)
    url: String,

    /// Print the response status line and headers to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Add a header to the request ("name: value"); repeatable
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Save the response body to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Follow redirects, up to 5 times
    #[arg(short = 'L', long = "location")]
    location: bool,
}

#[derive(Args)]
struct PostArgs {
    #[command(flatten)]
    common: RequestArgs,

    /// Inline request body; takes precedence over --file
    #[arg(short = 'd', long = "data", value_name = "DATA")]
    data: Option<String>,

    /// Read the request body from a file
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    file: Option<PathBuf>,
}

/// Parses the process arguments, runs the request, and returns the exit
/// code for `main`.
pub fn run() -> i32 {
    run_from(std::env::args())
}

/// Runs the CLI on an explicit argument list.
pub fn run_from<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version output are not failures
            let _ = err.print();
            return if err.use_stderr() { EXIT_USAGE } else { EXIT_OK };
        }
    };
    match cli.command {
        Command::Get(args) => {
            init_logging(args.verbose);
            request(Method::Get, args, None)
        }
        Command::Post(args) => {
            init_logging(args.common.verbose);
            let body = match post_body(&args) {
                Ok(body) => body,
                Err(code) => return code,
            };
            request(Method::Post, args.common, Some(body))
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let env = env_logger::Env::default().filter_or("RCURL_LOG", default);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}

fn post_body(args: &PostArgs) -> std::result::Result<Vec<u8>, i32> {
    if let Some(data) = &args.data {
        return Ok(data.clone().into_bytes());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            eprintln!("Failed to read body file: {err}");
            EXIT_USAGE
        });
    }
    Ok(Vec::new())
}

fn request(method: Method, args: RequestArgs, body: Option<Vec<u8>>) -> i32 {
    let extra_headers = match parse_headers(&args.headers) {
        Ok(headers) => headers,
        Err(message) => {
            eprintln!("{message}");
            return EXIT_USAGE;
        }
    };

    let build = |url: &str| -> http::Result<Request> {
        let mut request = Request::new(method, url, body.clone())?;
        for (name, value) in &extra_headers {
            request.headers.insert(name, value.clone());
        }
        Ok(request)
    };

    let mut response = match build(&args.url).and_then(|req| http::execute(&req)) {
        Ok(response) => response,
        Err(err) => {
            eprintln!("{err}");
            return EXIT_ERROR;
        }
    };

    // Redirect loop; each hop gets a fresh connection and the same
    // method, headers, and body
    if args.location {
        let mut followed = 0;
        while let Some(location) = redirect_location(&response) {
            if followed == MAX_REDIRECTS {
                eprintln!("Maximum number of redirects ({MAX_REDIRECTS}) exceeded");
                return EXIT_ERROR;
            }
            print_header_block(&response, args.verbose);
            response.body.close().ok();

            debug!("following redirect to {location}");
            response = match build(&location).and_then(|req| http::execute(&req)) {
                Ok(response) => response,
                Err(err) => {
                    eprintln!("{err}");
                    return EXIT_ERROR;
                }
            };
            followed += 1;
        }
    }

    // Collect the whole body before printing anything so a mid-stream
    // failure does not leave a truncated document behind
    let mut content = Vec::new();
    let result = Read::read_to_end(&mut response.body, &mut content);
    response.body.close().ok();
    if let Err(err) = result {
        eprintln!("{err}");
        return EXIT_ERROR;
    }

    print_header_block(&response, args.verbose);
    match write_output(args.output.as_deref(), &content) {
        Ok(()) => EXIT_OK,
        Err(err) => {
            eprintln!("{err}");
            EXIT_ERROR
        }
    }
}

fn parse_headers(raw: &[String]) -> std::result::Result<Vec<(String, String)>, String> {
    raw.iter()
        .map(|header| match header.split_once(':') {
            Some((name, value)) => Ok((name.trim().to_string(), value.trim().to_string())),
            None => Err(format!("header '{header}' should have the form \"name: value\"")),
        })
        .collect()
}

/// The next hop, when the response is a redirect pointing somewhere.
fn redirect_location(response: &Response) -> Option<String> {
    if !(300..=399).contains(&response.status_code) {
        return None;
    }
    response.headers.get("Location").map(str::to_string)
}

fn print_header_block(response: &Response, verbose: bool) {
    if !verbose {
        return;
    }
    eprintln!("{} {}", response.proto, response.status);
    eprint!("{}", response.headers);
    eprintln!();
}

fn write_output(path: Option<&std::path::Path>, content: &[u8]) -> std::result::Result<(), Error> {
    match path {
        Some(path) => fs::write(path, content)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(content)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
