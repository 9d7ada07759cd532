use std::error::Error;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use plaza::api::{Api, UploadFile};
use plaza::auth_form::{is_valid_email, password_strength, FormError, MIN_PASSWORD_LEN};
use plaza::backend::rest::RestBackend;
use plaza::cache::{keys, QueryCache};
use plaza::composer::{PostComposer, FILTERS};
use plaza::config::{load_file_config, log_path, save_file_config, Cli, Config};
use plaza::messenger::Messenger;
use plaza::model::{iso8601, now_secs, Conversation, Message, Post, ProfileUpdate};
use plaza::mutations::Mutations;
use plaza::realtime::RealtimeClient;
use plaza::session::{db_path, SessionStore};
use plaza::toast::{Language, MessageAlert, Notifier, Toast, ToastVariant};

const PROMPT: &str = "\x1b[1;35mplaza>\x1b[0m ";
const PAGE_SIZE: usize = 20;
const EXPLORE_LIMIT: usize = 30;
const SUGGESTION_LIMIT: usize = 5;
const SEARCH_LIMIT: usize = 20;
const LAST_THREAD_SETTING: &str = "last_thread";
const OAUTH_REDIRECT: &str = "http://localhost:3000/";
/// How often the session is checked for an access token about to expire.
const TOKEN_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Prints toasts and alerts between prompts.
struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn toast(&self, toast: Toast) {
        let marker = match toast.variant {
            ToastVariant::Default => "\x1b[32m✓\x1b[0m",
            ToastVariant::Destructive => "\x1b[31m✗\x1b[0m",
        };
        match toast.description {
            Some(d) => println!("{marker} {}: {d}", toast.title),
            None => println!("{marker} {}", toast.title),
        }
    }

    fn message_alert(&self, alert: MessageAlert) {
        // Bell stands in for the notification sound.
        println!(
            "\x07\n\x1b[1m{}\x1b[0m ({}): {}",
            alert.sender_name, alert.sender_id, alert.preview
        );
    }

    fn typing(&self, user_id: &str, typing: bool) {
        if typing {
            println!("\x1b[2m{user_id} is typing...\x1b[0m");
        } else {
            println!("\x1b[2m{user_id} stopped typing\x1b[0m");
        }
    }
}

struct App {
    runtime: Handle,
    config: Config,
    backend: Arc<RestBackend>,
    store: SessionStore,
    cache: Arc<QueryCache>,
    mutations: Mutations,
    messenger: Option<Arc<Messenger>>,
    realtime: Option<RealtimeClient>,
    refresher: Option<JoinHandle<()>>,
    composer: PostComposer,
}

#[tokio::main]
async fn main() {
    plaza::logging::init();
    if let Err(error) = run().await {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let config = Config::from_cli_and_env(Cli::parse())?;
    if !config.verbose {
        plaza::logging::log_to_file(&log_path(&config.data_dir))?;
    }
    let db = db_path(&config.data_dir);
    let backend =
        Arc::new(RestBackend::new(&config.url, &config.anon_key).with_store(SessionStore::open(&db)?));
    let store = SessionStore::open(&db)?;
    let cache = Arc::new(QueryCache::new());
    let mutations = Mutations::new(
        Api::new(backend.clone()),
        Arc::clone(&cache),
        Arc::new(TerminalNotifier),
        config.language,
    );

    let app = App {
        runtime: Handle::current(),
        config,
        backend,
        store,
        cache,
        mutations,
        messenger: None,
        realtime: None,
        refresher: None,
        composer: PostComposer::new(),
    };

    // The prompt and every backend call block, so the whole REPL runs off
    // the async workers that drive the realtime socket.
    tokio::task::spawn_blocking(move || repl(app).map_err(|e| e.to_string())).await??;
    Ok(())
}

fn repl(mut app: App) -> Result<(), Box<dyn Error>> {
    let runtime = app.runtime.clone();
    let _entered = runtime.enter();
    println!("plaza client. Backend: {}", app.config.url);
    app.backend.ensure_fresh();
    if let Some(session) = app.backend.session() {
        println!("Signed in as {}", session.user.email.as_deref().unwrap_or(&session.user.id));
        app.start_realtime()?;
        if let Some(last) = app.store.get_setting(LAST_THREAD_SETTING)? {
            println!("Last conversation: {last} (type 'open {last}')");
        }
    }
    print_help();

    let mut stdout = io::stdout();
    let mut editor = DefaultEditor::new()?;
    loop {
        let line = editor.readline(PROMPT);
        match line {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                editor.add_history_entry(input)?;

                if matches!(input, "quit" | "exit") {
                    println!("Goodbye!");
                    break;
                }

                if let Err(error) = app.handle_command(input) {
                    eprintln!("error: {error}");
                }

                stdout.flush()?;
            }
            Err(ReadlineError::Interrupted) => {
                println!("(ctrl-c) type 'exit' to quit.");
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(error) => return Err(error.into()),
        }
    }

    app.stop_realtime();
    Ok(())
}

fn print_help() {
    println!(
        "Commands:\n\
         help\n\
         signin <email> <password>\n\
         signup <email> <password> <username>\n\
         oauth <provider> [redirect_url]\n\
         signout | whoami | lang <ar|en>\n\
         profile [username] | edit <full_name|bio|website|location|username> <value>\n\
         avatar <image_path>\n\
         feed [page] | explore | posts <user_id> | saved\n\
         like <post_id> | save <post_id> | delete-post <post_id>\n\
         comments <post_id> | comment <post_id> <text>\n\
         compose add <image_path>... | compose filter <name> | compose next | compose back\n\
         compose caption <text> | compose location <text> | compose show | compose publish\n\
         stories | story <image_path>\n\
         follow <user_id> | users <query> | suggest\n\
         convos | open <user_id> | close | thread | type <text> | say <text>\n\
         edit-msg <message_id> <text> | del-msg <message_id>\n\
         notifs | read-notif <notification_id>\n\
         exit | quit\n"
    );
}

fn rest_of<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts.collect::<Vec<_>>().join(" ")
}

fn require<'a>(value: Option<&'a str>, usage: &str) -> Result<&'a str, Box<dyn Error>> {
    value.ok_or_else(|| format!("usage: {usage}").into())
}

impl App {
    fn api(&self) -> &Api {
        self.mutations.api()
    }

    fn start_realtime(&mut self) -> Result<(), Box<dyn Error>> {
        if !self.config.realtime {
            return Ok(());
        }
        self.backend.ensure_fresh();
        let Some(session) = self.backend.session() else {
            return Ok(());
        };
        let realtime =
            RealtimeClient::connect(self.backend.realtime_url(), self.backend.watch_access_token());
        let messenger = Messenger::start(&session.user.id, self.mutations.clone(), realtime.clone())?;
        self.realtime = Some(realtime);
        self.messenger = Some(messenger);

        let backend = Arc::clone(&self.backend);
        self.refresher = Some(self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(TOKEN_CHECK_INTERVAL);
            loop {
                ticker.tick().await;
                let backend = Arc::clone(&backend);
                if let Err(e) = tokio::task::spawn_blocking(move || backend.ensure_fresh()).await {
                    plaza::tlog!("auth: token check task failed: {}", e);
                }
            }
        }));
        Ok(())
    }

    fn stop_realtime(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
        if let Some(messenger) = self.messenger.take() {
            messenger.shutdown();
        }
        if let Some(realtime) = self.realtime.take() {
            realtime.shutdown();
        }
    }

    fn messenger(&self) -> Result<&Arc<Messenger>, Box<dyn Error>> {
        self.messenger
            .as_ref()
            .ok_or_else(|| "realtime messaging is not running (sign in first)".into())
    }

    fn set_language(&mut self, language: Language) -> Result<(), Box<dyn Error>> {
        let mut file = load_file_config(&self.config.data_dir)?;
        file.lang = Some(language.code().to_string());
        save_file_config(&self.config.data_dir, &file)?;
        self.config.language = language;
        self.mutations = Mutations::new(
            self.api().clone(),
            Arc::clone(&self.cache),
            Arc::clone(self.mutations.notifier()),
            language,
        );
        println!("Language set to {language}");
        Ok(())
    }

    fn form_error(&self, error: FormError) -> Box<dyn Error> {
        self.mutations.notifier().toast(error.toast(self.config.language));
        error.into()
    }

    fn handle_command(&mut self, input: &str) -> Result<(), Box<dyn Error>> {
        let mut parts = input.split_whitespace();
        let command = parts.next().unwrap_or("");

        match command {
            "help" => print_help(),
            "signin" => {
                let email = require(parts.next(), "signin <email> <password>")?;
                let password = require(parts.next(), "signin <email> <password>")?;
                if !is_valid_email(email) {
                    return Err(self.form_error(FormError::InvalidEmail));
                }
                self.stop_realtime();
                self.cache.clear();
                let session = self.backend.sign_in_with_password(email, password)?;
                println!("Signed in as {}", session.user.id);
                self.start_realtime()?;
            }
            "signup" => {
                let usage = "signup <email> <password> <username>";
                let email = require(parts.next(), usage)?;
                let password = require(parts.next(), usage)?;
                let username = require(parts.next(), usage)?;
                if !is_valid_email(email) {
                    return Err(self.form_error(FormError::InvalidEmail));
                }
                if password.chars().count() < MIN_PASSWORD_LEN {
                    return Err(self.form_error(FormError::WeakPassword));
                }
                if let (score, Some(label)) = password_strength(password) {
                    println!("Password strength: {} ({score}/5)", label.text(self.config.language));
                }
                match self.backend.sign_up(email, password, username)? {
                    Some(session) => {
                        self.api().create_profile(&session.user.id, username)?;
                        println!("Account created, signed in as {}", session.user.id);
                        self.start_realtime()?;
                    }
                    None => println!("Account created. Confirm your email, then sign in."),
                }
            }
            "signout" => {
                self.stop_realtime();
                self.backend.sign_out()?;
                self.cache.clear();
                println!("Signed out");
            }
            "whoami" => {
                let Some(user) = self.backend.fetch_user()? else {
                    println!("Not signed in");
                    return Ok(());
                };
                println!("{} id={}", user.email.as_deref().unwrap_or("(no email)"), user.id);
                if let Some(p) = self.api().current_profile()? {
                    println!("{} (@{})", p.display_name(), p.username);
                }
            }
            "oauth" => {
                let provider = require(parts.next(), "oauth <provider> [redirect_url]")?;
                let redirect = parts.next().unwrap_or(OAUTH_REDIRECT);
                println!("Open in a browser: {}", self.backend.oauth_url(provider, redirect));
            }
            "lang" => {
                let code = require(parts.next(), "lang <ar|en>")?;
                let language: Language = code.parse()?;
                self.set_language(language)?;
            }
            "profile" => {
                let profile = match parts.next() {
                    Some(username) => {
                        let api = self.api().clone();
                        let name = username.to_string();
                        self.cache
                            .fetch(&keys::profile(username), move || api.profile_by_username(&name))?
                    }
                    None => {
                        let api = self.api().clone();
                        self.cache
                            .fetch(&keys::current_profile(), move || api.current_profile())?
                    }
                };
                match profile {
                    Some(p) => {
                        let badge = if p.is_verified { " ✓" } else { "" };
                        println!("{} (@{}){badge}", p.display_name(), p.username);
                        println!("  id: {}", p.id);
                        if let Some(bio) = &p.bio {
                            println!("  {bio}");
                        }
                        println!(
                            "  {} posts · {} followers · {} following",
                            p.posts_count, p.followers_count, p.following_count
                        );
                        println!("  avatar: {}", p.avatar_or_fallback());
                        if self.backend.session().is_some_and(|s| s.user.id != p.id) {
                            let following = self.api().is_following(&p.id)?;
                            println!("  {}", if following { "following" } else { "not following" });
                        }
                    }
                    None => println!("No such profile"),
                }
            }
            "edit" => {
                let usage = "edit <full_name|bio|website|location|username> <value>";
                let field = require(parts.next(), usage)?;
                let value = rest_of(parts);
                let mut update = ProfileUpdate::default();
                match field {
                    "full_name" => update.full_name = Some(value),
                    "bio" => update.bio = Some(value),
                    "website" => update.website = Some(value),
                    "location" => update.location = Some(value),
                    "username" => update.username = Some(value),
                    _ => return Err(format!("usage: {usage}").into()),
                }
                self.mutations.update_profile(&update)?;
            }
            "avatar" => {
                let path = require(parts.next(), "avatar <image_path>")?;
                let file = UploadFile::from_path(Path::new(path))?;
                let mut progress = |pct: u8| println!("  upload {pct}%");
                let url = self.api().upload_avatar(&file, Some(&mut progress))?;
                self.mutations.update_profile(&ProfileUpdate {
                    avatar_url: Some(url),
                    ..Default::default()
                })?;
            }
            "feed" => {
                let page: usize = parts.next().map(str::parse::<usize>).transpose()?.unwrap_or(0);
                let offset = page * PAGE_SIZE;
                let api = self.api().clone();
                let posts = self.cache.fetch(&keys::feed(PAGE_SIZE, offset), move || {
                    api.feed(PAGE_SIZE, offset)
                })?;
                print_posts(&posts);
            }
            "explore" => {
                let api = self.api().clone();
                let posts = self
                    .cache
                    .fetch(&keys::explore(EXPLORE_LIMIT), move || api.explore(EXPLORE_LIMIT))?;
                print_posts(&posts);
            }
            "posts" => {
                let user = require(parts.next(), "posts <user_id>")?;
                let api = self.api().clone();
                let id = user.to_string();
                let posts = self
                    .cache
                    .fetch(&keys::user_posts(user), move || api.user_posts(&id))?;
                print_posts(&posts);
            }
            "saved" => {
                let api = self.api().clone();
                let posts = self.cache.fetch(&keys::saved(), move || api.saved_posts())?;
                print_posts(&posts);
            }
            "like" => {
                let post = require(parts.next(), "like <post_id>")?;
                let liked = self.mutations.toggle_like(post)?;
                println!("{}", if liked { "Liked" } else { "Unliked" });
            }
            "save" => {
                let post = require(parts.next(), "save <post_id>")?;
                let saved = self.mutations.toggle_save(post)?;
                println!("{}", if saved { "Saved" } else { "Removed from saved" });
            }
            "delete-post" => {
                let post = require(parts.next(), "delete-post <post_id>")?;
                self.mutations.delete_post(post)?;
            }
            "comments" => {
                let post = require(parts.next(), "comments <post_id>")?;
                let api = self.api().clone();
                let id = post.to_string();
                let comments = self
                    .cache
                    .fetch(&keys::comments(post), move || api.comments(&id))?;
                for c in comments {
                    let who = c.profile.as_ref().map(|p| p.username.as_str()).unwrap_or(&c.user_id);
                    println!("@{who}: {}", c.content);
                }
            }
            "comment" => {
                let post = require(parts.next(), "comment <post_id> <text>")?;
                let text = rest_of(parts);
                if text.is_empty() {
                    return Err("usage: comment <post_id> <text>".into());
                }
                self.mutations.create_comment(post, &text)?;
                println!("Comment added");
            }
            "compose" => self.compose(parts.next(), rest_of(parts))?,
            "stories" => {
                let api = self.api().clone();
                let now = iso8601(now_secs());
                let stories = self.cache.fetch(&keys::stories(), move || api.stories(&now))?;
                for s in stories {
                    let who = s.profile.as_ref().map(|p| p.username.as_str()).unwrap_or(&s.user_id);
                    println!("@{who} [{}] {} (until {})", s.media_type.as_str(), s.media_url, s.expires_at);
                }
            }
            "story" => {
                let path = require(parts.next(), "story <image_path>")?;
                let file = UploadFile::from_path(Path::new(path))?;
                let media_type = if file.content_type.starts_with("video/") {
                    plaza::model::MediaType::Video
                } else {
                    plaza::model::MediaType::Image
                };
                let url = self.api().upload_post_image(&file, None)?;
                self.mutations.create_story(&url, media_type)?;
            }
            "follow" => {
                let target = require(parts.next(), "follow <user_id>")?;
                let following = self.mutations.toggle_follow(target)?;
                println!("{}", if following { "Following" } else { "Unfollowed" });
            }
            "users" => {
                let query = rest_of(parts);
                for p in self.api().search_users(&query, SEARCH_LIMIT)? {
                    println!("@{} {} id={}", p.username, p.display_name(), p.id);
                }
            }
            "suggest" => {
                let api = self.api().clone();
                let users = self.cache.fetch(&keys::suggestions(SUGGESTION_LIMIT), move || {
                    api.suggested_users(SUGGESTION_LIMIT)
                })?;
                for p in users {
                    println!("@{} {} id={}", p.username, p.display_name(), p.id);
                }
            }
            "convos" => {
                let api = self.api().clone();
                let conversations = self
                    .cache
                    .fetch(&keys::conversations(), move || api.conversations())?;
                print_conversations(&conversations);
            }
            "open" => {
                let user = require(parts.next(), "open <user_id>")?;
                self.messenger()?.open_thread(user);
                self.store.set_setting(LAST_THREAD_SETTING, user)?;
                self.print_thread()?;
            }
            "close" => self.messenger()?.close_thread(),
            "thread" => self.print_thread()?,
            "type" => {
                let text = rest_of(parts);
                self.messenger()?.input_changed(&text);
            }
            "say" => {
                let text = rest_of(parts);
                let message = self.runtime.block_on(self.messenger()?.send(&text))?;
                println!("sent {}", message.id);
            }
            "edit-msg" => {
                let id = require(parts.next(), "edit-msg <message_id> <text>")?;
                let text = rest_of(parts);
                let counterpart = self.open_counterpart()?;
                self.mutations.edit_message(&counterpart, id, &text)?;
            }
            "del-msg" => {
                let id = require(parts.next(), "del-msg <message_id>")?;
                let counterpart = self.open_counterpart()?;
                self.mutations.delete_message(&counterpart, id)?;
            }
            "notifs" => {
                let api = self.api().clone();
                let notifications = self
                    .cache
                    .fetch(&keys::notifications(), move || api.notifications())?;
                for n in notifications {
                    let who = n.actor.as_ref().map(|p| p.username.as_str()).unwrap_or("?");
                    println!(
                        "{} {} {:?} from @{who} {}",
                        if n.is_read { " " } else { "*" },
                        n.id,
                        n.kind,
                        n.content.as_deref().unwrap_or("")
                    );
                }
            }
            "read-notif" => {
                let id = require(parts.next(), "read-notif <notification_id>")?;
                self.mutations.mark_notification_read(id)?;
            }
            _ => println!("Unknown command: {command}"),
        }

        Ok(())
    }

    fn open_counterpart(&self) -> Result<String, Box<dyn Error>> {
        self.messenger()?
            .open_thread_id()
            .ok_or_else(|| "open a conversation first".into())
    }

    fn print_thread(&self) -> Result<(), Box<dyn Error>> {
        let messenger = self.messenger()?;
        let counterpart = self.open_counterpart()?;
        let api = self.api().clone();
        let id = counterpart.clone();
        let messages: Vec<Message> = self
            .cache
            .fetch(&keys::messages(&counterpart), move || api.messages(&id))?;
        for m in &messages {
            let arrow = if m.sender_id == messenger.viewer() { ">" } else { "<" };
            let body = if m.is_deleted { "(deleted)" } else { m.content.as_str() };
            let edited = if m.is_edited { " (edited)" } else { "" };
            println!("{arrow} [{}] {body}{edited}", m.id);
        }
        if messenger.is_counterpart_typing() {
            println!("\x1b[2m{counterpart} is typing...\x1b[0m");
        }
        Ok(())
    }

    fn compose(&mut self, sub: Option<&str>, rest: String) -> Result<(), Box<dyn Error>> {
        let language = self.config.language;
        match sub.unwrap_or("show") {
            "add" => {
                let mut files = Vec::new();
                for path in rest.split_whitespace() {
                    files.push(UploadFile::from_path(Path::new(path))?);
                }
                let added = self.composer.add_files(files);
                println!("Added {added} image(s)");
            }
            "filter" => self.composer.apply_filter(rest.trim())?,
            "next" => self.composer.next(),
            "back" => self.composer.back(),
            "prev-image" => self.composer.previous_image(),
            "next-image" => self.composer.next_image(),
            "remove" => {
                let index: usize = rest.trim().parse()?;
                self.composer.remove(index);
            }
            "caption" => self.composer.set_caption(&rest)?,
            "location" => self.composer.set_location(&rest),
            "publish" => {
                let mut progress = |pct: u8| println!("  upload {pct}%");
                let post = self.composer.publish(&self.mutations, Some(&mut progress))?;
                println!("Published {}", post.id);
                return Ok(());
            }
            "show" => {}
            other => return Err(format!("unknown compose command '{other}'").into()),
        }
        println!("[{}]", self.composer.step().title(language));
        for (i, image) in self.composer.images().iter().enumerate() {
            let marker = if i == self.composer.current_index() { "*" } else { " " };
            println!("{marker} {i}: {} ({})", image.file.name, image.filter);
        }
        if let Some(current) = self.composer.current_image() {
            println!("editing {} with filter '{}'", current.file.name, current.filter);
        }
        let mut moves = Vec::new();
        if self.composer.can_go_back() {
            moves.push("back");
        }
        if self.composer.can_go_next() {
            moves.push("next");
        }
        if !moves.is_empty() {
            println!("compose {}", moves.join(" | "));
        }
        if self.composer.step() == plaza::composer::Step::Filter {
            let names: Vec<&str> = FILTERS.iter().map(|f| f.id).collect();
            println!("filters: {}", names.join(", "));
        }
        if !self.composer.caption().is_empty() {
            println!("caption: {}", self.composer.caption());
        }
        if !self.composer.location().is_empty() {
            println!("location: {}", self.composer.location());
        }
        Ok(())
    }
}

fn print_posts(posts: &[Post]) {
    if posts.is_empty() {
        println!("(no posts)");
    }
    for p in posts {
        let who = p.profile.as_ref().map(|pr| pr.username.as_str()).unwrap_or(&p.user_id);
        println!(
            "{} @{who}: {} [{}{} {}  💬 {}]{}",
            p.id,
            p.caption.as_deref().unwrap_or(""),
            if p.is_liked { "♥" } else { "♡" },
            if p.is_saved { " saved" } else { "" },
            p.likes_count,
            p.comments_count,
            p.location.as_deref().map(|l| format!(" @ {l}")).unwrap_or_default(),
        );
    }
}

fn print_conversations(conversations: &[Conversation]) {
    if conversations.is_empty() {
        println!("(no conversations)");
    }
    for c in conversations {
        let name = c
            .user
            .as_ref()
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| c.counterpart_id.clone());
        let unread = if c.unread_count > 0 {
            format!(" ({} unread)", c.unread_count)
        } else {
            String::new()
        };
        println!("{name} [{}]{unread}: {}", c.counterpart_id, c.last_message.content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repl_state_can_move_to_a_blocking_thread() {
        fn moves_across_threads<T: Send + 'static>() {}
        moves_across_threads::<App>();
    }
}
