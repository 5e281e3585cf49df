use crate::{
    api::{HttpClient, PrintShopApi},
    config::Config,
    error::Error,
    history::{self, Expenses, ShopStats},
    journal::Journal,
    models::{JobRef, JobTicket, PrintJob, PrintType, RegisterRequest, Role},
    poller::{PollEnd, PollEvent, StatusPoller},
    queue::{self, QueueTable},
    render::SpoolPrinter,
    session::{self, Session},
    shops,
    state::{LocalState, StateDir},
    upload::{self, PrintOptions, UploadReceipt, UploadRequest},
    workflow::{self, Outcome, PrintWorkflow, TerminalConfirmer},
    Args, Command,
};
use anyhow::Result;
use chrono::Local;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct Context {
    pub args: Args,
    pub config: Config,
    pub state_dir: StateDir,
    pub state: RefCell<LocalState>,
}

impl Context {
    fn api(&self) -> Arc<dyn PrintShopApi> {
        let token = self.state.borrow().session.as_ref().map(|s| s.token.clone());
        Arc::new(HttpClient::new(self.config.api.base_url(), self.config.api.timeout()).with_token(token))
    }

    fn require(&self, role: Role) -> Result<Session> {
        let state = self.state.borrow();
        let session = session::require(state.session.as_ref(), role)?;
        Ok(session.clone())
    }
}

/// Operator-facing error; the detail goes to the log
fn fail(e: Error) -> anyhow::Error {
    tracing::debug!(error = %e, "command failed");
    anyhow::anyhow!(e.user_message())
}

fn prompt(rl: &mut DefaultEditor, label: &str) -> Result<String> {
    match rl.readline(label) {
        Ok(line) => Ok(line.trim().to_string()),
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => Err(anyhow::anyhow!("Cancelled")),
        Err(e) => Err(e.into()),
    }
}

pub fn run(ctx: &Context) -> Result<()> {
    match &ctx.args.command {
        Command::Login { username, password } => login(ctx, username.clone(), password.clone()),
        Command::Register {
            username,
            password,
            role,
            lat,
            long,
        } => register(ctx, username, password.clone(), *role, *lat, *long),
        Command::Logout => {
            ctx.state.borrow_mut().session = None;
            session::Session::remove(&ctx.state_dir.session())?;
            println!("Logged out");
            Ok(())
        }
        Command::Shops { lat, long } => list_shops(ctx, *lat, *long),
        Command::Favorite { shop_id } => {
            ctx.require(Role::Customer)?;
            let added = ctx.state.borrow_mut().favorites.toggle(*shop_id);
            if added {
                println!("⭐ Shop {} added to favorites", shop_id);
            } else {
                println!("Shop {} removed from favorites", shop_id);
            }
            Ok(())
        }
        Command::Favorites => list_favorites(ctx),
        Command::Upload {
            file,
            copies,
            print_mode,
            color_mode,
            paper_size,
            queue,
            shop,
            no_watch,
        } => {
            let request = UploadRequest {
                file: file.clone(),
                options: PrintOptions {
                    copies: *copies,
                    print_mode: *print_mode,
                    color_mode: *color_mode,
                    paper_size: *paper_size,
                },
                print_type: if *queue {
                    PrintType::Queue
                } else {
                    PrintType::Private
                },
                shop_id: *shop,
            };
            upload_file(ctx, &request, *no_watch)
        }
        Command::Status { code, watch } => {
            ctx.require(Role::Customer)?;
            workflow::validate_code(code).map_err(fail)?;
            if *watch {
                watch_status(ctx, code)
            } else {
                let status = ctx.api().file_status(code).map_err(fail)?;
                println!("{}: {}", code, status.label());
                Ok(())
            }
        }
        Command::Files => {
            ctx.require(Role::Customer)?;
            let files = ctx.api().my_files().map_err(fail)?;
            if files.is_empty() {
                println!("No files uploaded yet");
            }
            for job in &files {
                println!("{}", format_job(job));
            }
            Ok(())
        }
        Command::Expenses => {
            ctx.require(Role::Customer)?;
            let files = ctx.api().my_files().map_err(fail)?;
            let expenses = Expenses::from_jobs(&files);
            println!(
                "Spent:   {} ({} printed)",
                history::format_rupees(expenses.spent),
                expenses.printed_jobs
            );
            println!(
                "Pending: {} ({} waiting)",
                history::format_rupees(expenses.pending),
                expenses.pending_jobs
            );
            Ok(())
        }
        Command::Queue { watch } => {
            ctx.require(Role::Shopkeeper)?;
            if *watch {
                watch_queue(ctx)
            } else {
                let mut table = QueueTable::new(ctx.api());
                table.refresh_now();
                print!("{}", with_newline(queue::format_queue(&table.snapshot())));
                table.stop();
                Ok(())
            }
        }
        Command::Print { code, queue_id } => {
            ctx.require(Role::Shopkeeper)?;
            let job = match (code, queue_id) {
                (Some(code), _) => JobRef::Code(workflow::normalize_code(code)),
                (None, Some(id)) => JobRef::Queue(*id),
                (None, None) => return Err(anyhow::anyhow!("Give --code or --queue-id")),
            };
            let mut wf = desk_workflow(ctx, &uuid::Uuid::new_v4().to_string())?;
            let outcome = wf.run(job);
            println!("{}", outcome.message());
            match outcome {
                Outcome::Failed { .. } => Err(anyhow::anyhow!("Print not completed")),
                _ => Ok(()),
            }
        }
        Command::Download { code, output } => {
            ctx.require(Role::Shopkeeper)?;
            let code = workflow::normalize_code(code);
            let dest = output
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("{}.pdf", code)));
            let bytes = workflow::download(ctx.api().as_ref(), &code, &dest)
                .map_err(|e| anyhow::anyhow!(workflow::fetch_message(&e)))?;
            println!("Saved {} bytes to {}", bytes, dest.display());
            Ok(())
        }
        Command::History => {
            ctx.require(Role::Shopkeeper)?;
            print_history(ctx.api().as_ref())
        }
        Command::Stats => {
            ctx.require(Role::Shopkeeper)?;
            print_stats(ctx.api().as_ref())
        }
        Command::Desk => {
            ctx.require(Role::Shopkeeper)?;
            run_desk(ctx)
        }
    }
}

fn login(ctx: &Context, username: Option<String>, password: Option<String>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let username = match username {
        Some(u) => u,
        None => prompt(&mut rl, "Username: ")?,
    };
    let password = match password {
        Some(p) => p,
        None => prompt(&mut rl, "Password: ")?,
    };
    if username.is_empty() || password.is_empty() {
        return Err(anyhow::anyhow!("Username and password are required"));
    }

    let api = HttpClient::new(ctx.config.api.base_url(), ctx.config.api.timeout());
    let session = match session::login(&api, &username, &password) {
        Ok(session) => session,
        Err(Error::Unauthorized(body)) | Err(Error::Status { body, .. }) => {
            let body = body.trim();
            return Err(anyhow::anyhow!(if body.is_empty() {
                "Login failed".to_string()
            } else {
                format!("Login failed: {}", body)
            }));
        }
        Err(e) => return Err(fail(e)),
    };

    // Written now so a later failure in this run cannot lose it
    session.save(&ctx.state_dir.session())?;
    println!("Logged in as {} ({})", session.username, session.role);
    ctx.state.borrow_mut().session = Some(session);
    Ok(())
}

fn register(
    ctx: &Context,
    username: &str,
    password: Option<String>,
    role: Role,
    lat: Option<f64>,
    long: Option<f64>,
) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => prompt(&mut DefaultEditor::new()?, "Password: ")?,
    };
    if password.is_empty() {
        return Err(anyhow::anyhow!("Password is required"));
    }

    let (lat, long) = match role {
        Role::Shopkeeper => {
            match shops::resolve_location(lat, long, ctx.config.location.as_ref()) {
                Some(loc) => (loc.lat, loc.long),
                None => {
                    return Err(anyhow::anyhow!(
                        "Shopkeepers need a location: pass --lat and --long or set [location] in config"
                    ))
                }
            }
        }
        Role::Customer => (0.0, 0.0),
    };

    let request = RegisterRequest {
        username: username.to_string(),
        password,
        role,
        lat,
        long,
    };
    let api = HttpClient::new(ctx.config.api.base_url(), ctx.config.api.timeout());
    api.register(&request).map_err(fail)?;
    println!("Registered {} as {}. Run `printdrop login` next.", username, role);
    Ok(())
}

fn print_shop(shop: &crate::models::Shop, favorites: &crate::favorites::Favorites) {
    println!("  {}", shops::format_shop(shop, favorites));
    if let Some(url) = shops::directions_url(shop.lat, shop.long) {
        println!("      📍 {}", url);
    }
}

fn list_shops(ctx: &Context, lat: Option<f64>, long: Option<f64>) -> Result<()> {
    ctx.require(Role::Customer)?;
    let near = shops::resolve_location(lat, long, ctx.config.location.as_ref());
    if near.is_none() {
        println!("No location given; showing shops in default order");
    }
    let list = shops::fetch_nearby(ctx.api().as_ref(), near);
    if list.is_empty() {
        println!("No shops found");
        return Ok(());
    }

    let state = ctx.state.borrow();
    let sel = shops::selector(&list, &state.favorites);
    if !sel.favorites.is_empty() {
        println!("⭐ Favorites");
        for shop in &sel.favorites {
            print_shop(shop, &state.favorites);
        }
    }
    println!("Nearest");
    for shop in &sel.nearest {
        print_shop(shop, &state.favorites);
    }
    if !sel.more.is_empty() {
        println!("More shops");
        for shop in &sel.more {
            print_shop(shop, &state.favorites);
        }
    }
    Ok(())
}

fn list_favorites(ctx: &Context) -> Result<()> {
    ctx.require(Role::Customer)?;
    let state = ctx.state.borrow();
    if state.favorites.is_empty() {
        println!("No favorite shops yet. Use `printdrop favorite <shop id>`.");
        return Ok(());
    }
    let near = shops::resolve_location(None, None, ctx.config.location.as_ref());
    let list = shops::fetch_nearby(ctx.api().as_ref(), near);
    for id in state.favorites.ids() {
        match shops::find(&list, *id) {
            Some(shop) => print_shop(shop, &state.favorites),
            None => println!("  ⭐ [{}] (not in the directory right now)", id),
        }
    }
    Ok(())
}

/// What the customer sees after an upload; a queue receipt never shows a code
pub fn format_receipt(receipt: &UploadReceipt) -> String {
    let mut out = match receipt {
        UploadReceipt::Private { code, .. } => {
            format!("✅ Uploaded! Show this code at any shop:\n  Code:  {}\n", code)
        }
        UploadReceipt::Queue { queue_position, .. } => {
            format!("✅ Added to the queue\n  Position: #{}\n", queue_position)
        }
    };
    out.push_str(&format!("  Pages: {}\n", receipt.num_pages()));
    out.push_str(&format!(
        "  Cost:  {}",
        history::format_rupees(receipt.total_cost())
    ));
    out
}

/// The code to poll after an upload, if any
fn code_to_watch(receipt: &UploadReceipt, no_watch: bool) -> Option<&str> {
    if no_watch {
        None
    } else {
        receipt.code()
    }
}

fn upload_file(ctx: &Context, request: &UploadRequest, no_watch: bool) -> Result<()> {
    ctx.require(Role::Customer)?;
    let api = ctx.api();
    let (receipt, files) = match upload::submit_and_refresh(api.as_ref(), request) {
        Ok(result) => result,
        Err(e @ Error::Validation(_)) => return Err(fail(e)),
        Err(e) => return Err(anyhow::anyhow!("Upload failed: {}", e.user_message())),
    };

    println!("{}", format_receipt(&receipt));

    if let (Some(shop_id), UploadReceipt::Queue { .. }) = (request.shop_id, &receipt) {
        let near = shops::resolve_location(None, None, ctx.config.location.as_ref());
        let list = shops::fetch_nearby(api.as_ref(), near);
        if let Some(shop) = shops::find(&list, shop_id) {
            println!("  Shop:  {}", shop.username);
            if let Some(url) = shops::directions_url(shop.lat, shop.long) {
                println!("  📍 {}", url);
            }
        }
    }

    if let Some(files) = files {
        println!("Your files:");
        for job in &files {
            println!("{}", format_job(job));
        }
    }

    match code_to_watch(&receipt, no_watch) {
        Some(code) => watch_status(ctx, code),
        None => Ok(()),
    }
}

fn watch_status(ctx: &Context, code: &str) -> Result<()> {
    let poller = StatusPoller::new(ctx.api(), ctx.config.polling.status_interval());
    let sub = poller.subscribe(code)?;
    tracing::debug!(
        polls = poller.active_polls(),
        listeners = poller.listener_count(code),
        "subscribed"
    );
    println!("Watching {} (Ctrl-C to stop)", sub.code());

    let mut last = None;
    while let Some(event) = sub.recv() {
        match event {
            PollEvent::Status(status) => {
                if last != Some(status) {
                    println!("{}: {}", code, status.label());
                    last = Some(status);
                }
            }
            PollEvent::Finished(PollEnd::Downloaded) => {
                println!("🖨️ Printed at the shop");
                break;
            }
            PollEvent::Finished(PollEnd::Missing) => {
                println!("{}", workflow::NOT_FOUND_MESSAGE);
                break;
            }
        }
    }
    Ok(())
}

fn watch_queue(ctx: &Context) -> Result<()> {
    let interval = ctx.config.polling.queue_interval();
    let mut table = QueueTable::new(ctx.api());
    table.watch(interval)?;

    let mut shown = None;
    loop {
        std::thread::sleep(interval / 2);
        let snap = table.snapshot();
        let key = (snap.refreshed_at, snap.last_error.clone());
        if shown.as_ref() != Some(&key) {
            println!("— queue at {} —", Local::now().format("%H:%M:%S"));
            print!("{}", with_newline(queue::format_queue(&snap)));
            shown = Some(key);
        }
        if !table.is_watching() {
            return Ok(());
        }
    }
}

fn with_newline(mut s: String) -> String {
    if !s.ends_with('\n') {
        s.push('\n');
    }
    s
}

fn format_job(job: &PrintJob) -> String {
    let name = job.filename.as_deref().unwrap_or("(unnamed)");
    let mut line = format!(
        "{} {} - {} page(s) × {} - {}",
        job.status.label(),
        name,
        job.num_pages,
        job.copies,
        history::format_rupees(job.total_cost)
    );
    match &job.ticket {
        JobTicket::Private { code } => line.push_str(&format!("\n    Code: {}", code)),
        JobTicket::Queue { queue_position, .. } => {
            line.push_str(&format!("\n    Queue #{}", queue_position));
            if let Some(shop) = &job.shop_name {
                line.push_str(&format!(" at {}", shop));
            }
            if let Some(loc) = job.shop_location {
                if let Some(url) = shops::directions_url(Some(loc.lat), Some(loc.long)) {
                    line.push_str(&format!("\n    📍 {}", url));
                }
            }
        }
    }
    line
}

fn print_history(api: &dyn PrintShopApi) -> Result<()> {
    let entries = api.shop_history().map_err(fail)?;
    if entries.is_empty() {
        println!("No prints yet");
    }
    for e in &entries {
        println!(
            "{}  {:<7} {:>3} page(s) × {:<3} {:>10}  {}",
            e.date.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            e.kind.as_str(),
            e.pages,
            e.copies,
            history::format_rupees(e.cost),
            e.code.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn print_stats(api: &dyn PrintShopApi) -> Result<()> {
    let entries = api.shop_history().map_err(fail)?;
    let stats = ShopStats::from_entries(&entries, Local::now().date_naive());
    println!("Total earnings: {}", history::format_rupees(stats.total_earnings));
    println!("Today:          {}", history::format_rupees(stats.today_earnings));
    println!("Total prints:   {}", stats.total_prints);
    let recent = history::recent(&entries, 5);
    if !recent.is_empty() {
        println!("Recent:");
        for e in recent {
            println!(
                "  {} {} {}",
                e.date.with_timezone(&Local).format("%b %d %H:%M"),
                e.kind.as_str(),
                history::format_rupees(e.cost)
            );
        }
    }
    Ok(())
}

fn desk_workflow(
    ctx: &Context,
    desk_id: &str,
) -> Result<PrintWorkflow<SpoolPrinter, TerminalConfirmer>> {
    let printing = &ctx.config.printing;
    let surface = SpoolPrinter::new(printing.argv()?, printing.render_timeout(), printing.settle())
        .map_err(fail)?;
    let mut wf = PrintWorkflow::new(ctx.api(), surface, TerminalConfirmer)
        .with_confirm_delay(printing.confirm_delay());
    match Journal::new(&ctx.state_dir.journal(), desk_id) {
        Ok(journal) => wf = wf.with_journal(journal),
        Err(e) => tracing::warn!(error = %e, "desk journal unavailable"),
    }
    Ok(wf)
}

fn load_line_history(rl: &mut DefaultEditor, path: &Path) {
    if path.exists() {
        if let Err(e) = rl.load_history(path) {
            tracing::debug!(error = %e, "could not load desk history");
        }
    }
}

pub fn run_desk(ctx: &Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history_path = ctx.state_dir.line_history();
    load_line_history(&mut rl, &history_path);

    let desk_id = uuid::Uuid::new_v4().to_string();
    let mut wf = desk_workflow(ctx, &desk_id)?;
    let mut table = QueueTable::new(ctx.api());
    table.watch(ctx.config.polling.queue_interval())?;
    let mut last_code: Option<String> = None;

    let shop = ctx
        .state
        .borrow()
        .session
        .as_ref()
        .map(|s| s.username.clone())
        .unwrap_or_default();
    println!("printdrop desk for {} - type help for commands, exit to quit", shop);
    tracing::info!(%desk_id, "desk started");

    loop {
        match rl.readline("desk> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                let parts: Vec<&str> = line.splitn(2, ' ').collect();
                let arg = parts.get(1).map(|s| s.trim()).filter(|s| !s.is_empty());
                let job = match parts[0] {
                    "exit" | "quit" => break,
                    "help" => {
                        println!("Commands:");
                        println!("  print [code]   - print a private code (repeats the last code if omitted)");
                        println!("  take <id>      - print a queue job by id");
                        println!("  next           - print the first waiting queue job");
                        println!("  queue          - show the queue");
                        println!("  refresh        - refresh the queue now");
                        println!("  history        - completed prints");
                        println!("  stats          - earnings summary");
                        println!("  exit           - quit");
                        None
                    }
                    "print" => match arg
                        .map(workflow::normalize_code)
                        .or_else(|| last_code.clone())
                    {
                        Some(code) => {
                            last_code = Some(code.clone());
                            Some(JobRef::Code(code))
                        }
                        None => {
                            println!("Usage: print <code>");
                            None
                        }
                    },
                    "take" => match arg.and_then(|a| a.parse::<i64>().ok()) {
                        Some(id) => {
                            if table.find(id).is_none() {
                                println!("Job {} is not in the last queue refresh; trying anyway", id);
                            }
                            Some(JobRef::Queue(id))
                        }
                        None => {
                            println!("Usage: take <queue job id>");
                            None
                        }
                    },
                    "next" => match table.snapshot().next_pending() {
                        Some(job) => Some(JobRef::Queue(job.id)),
                        None => {
                            println!("Nothing waiting in the queue");
                            None
                        }
                    },
                    "queue" => {
                        print!("{}", with_newline(queue::format_queue(&table.snapshot())));
                        None
                    }
                    "refresh" => {
                        table.refresh_now();
                        print!("{}", with_newline(queue::format_queue(&table.snapshot())));
                        None
                    }
                    "history" => {
                        if let Err(e) = print_history(ctx.api().as_ref()) {
                            println!("{}", e);
                        }
                        None
                    }
                    "stats" => {
                        if let Err(e) = print_stats(ctx.api().as_ref()) {
                            println!("{}", e);
                        }
                        None
                    }
                    other => {
                        println!("Unknown command: {}. Type help for commands.", other);
                        None
                    }
                };

                if let Some(job) = job {
                    let outcome = wf.run(job);
                    println!("{}", outcome.message());
                    if outcome.clears_code() {
                        last_code = None;
                    }
                    if outcome.refreshes_queue() {
                        table.refresh_now();
                    }
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    table.stop();
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Err(e) = rl.save_history(&history_path) {
        tracing::warn!(error = %e, "could not save desk history");
    }
    tracing::info!(%desk_id, "desk closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColorMode, JobStatus, Location, PaperSize, PrintMode};

    fn job(ticket: JobTicket) -> PrintJob {
        PrintJob {
            id: 1,
            owner: None,
            filename: Some("notes.pdf".to_string()),
            num_pages: 3,
            copies: 2,
            print_mode: PrintMode::Single,
            color_mode: ColorMode::Bw,
            paper_size: PaperSize::A4,
            ticket,
            total_cost: 6.0,
            status: JobStatus::Pending,
            shop_name: Some("corner-copy".to_string()),
            shop_location: Some(Location {
                lat: 12.9,
                long: 77.6,
            }),
            created_at: None,
        }
    }

    #[test]
    fn test_private_job_line_shows_code() {
        let line = format_job(&job(JobTicket::Private {
            code: "AB12CD".to_string(),
        }));
        assert!(line.contains("Code: AB12CD"));
        assert!(line.contains("₹6.00"));
        assert!(!line.contains("Queue #"));
    }

    #[test]
    fn test_queue_job_line_shows_position_and_directions() {
        let line = format_job(&job(JobTicket::Queue {
            shop_id: 5,
            queue_position: 3,
        }));
        assert!(line.contains("Queue #3 at corner-copy"));
        assert!(line.contains("destination=12.9,77.6"));
        assert!(!line.contains("Code:"));
    }

    #[test]
    fn test_private_receipt_shows_code_pages_and_cost() {
        let out = format_receipt(&UploadReceipt::Private {
            code: "AB12CD".to_string(),
            num_pages: 3,
            total_cost: 6.0,
        });
        assert!(out.contains("AB12CD"));
        assert!(out.contains("Pages: 3"));
        assert!(out.contains("₹6.00"));
        assert!(!out.contains("Position"));
    }

    #[test]
    fn test_queue_receipt_shows_position_without_code() {
        let out = format_receipt(&UploadReceipt::Queue {
            queue_position: 3,
            num_pages: 1,
            total_cost: 2.0,
        });
        assert!(out.contains("#3"));
        assert!(out.contains("₹2.00"));
        assert!(!out.contains("Code"));
    }

    #[test]
    fn test_private_upload_is_watched_unless_opted_out() {
        let private = UploadReceipt::Private {
            code: "AB12CD".to_string(),
            num_pages: 1,
            total_cost: 2.0,
        };
        let queued = UploadReceipt::Queue {
            queue_position: 1,
            num_pages: 1,
            total_cost: 2.0,
        };
        assert_eq!(code_to_watch(&private, false), Some("AB12CD"));
        assert_eq!(code_to_watch(&private, true), None);
        assert_eq!(code_to_watch(&queued, false), None);
    }

    #[test]
    fn test_with_newline() {
        assert_eq!(with_newline("a".to_string()), "a\n");
        assert_eq!(with_newline("a\n".to_string()), "a\n");
    }
}
