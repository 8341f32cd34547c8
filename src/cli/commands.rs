use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::app::App;
use crate::config::AppConfig;
use crate::countries::{self, CountryList};
use crate::form::{EntryForm, SubmitOutcome};
use crate::picture::PictureFile;
use crate::record::{Field, Record};
use crate::search::{TablePage, TableView};
use crate::storage::{KeyValueStore, RecordStore, StorageHandle};

#[derive(Args, Debug, Clone, Default)]
pub struct AddArgs {
    /// Full name (prompted for when omitted on a terminal)
    #[arg(long)]
    pub name: Option<String>,
    /// Email address (prompted for when omitted on a terminal)
    #[arg(long)]
    pub email: Option<String>,
    /// Phone number, at least 7 digits (prompted for when omitted on a terminal)
    #[arg(long)]
    pub phone: Option<String>,
    /// Date of birth as YYYY-MM-DD
    #[arg(long)]
    pub dob: Option<String>,
    #[arg(long)]
    pub city: Option<String>,
    #[arg(long)]
    pub district: Option<String>,
    /// One of "Province No. 1" .. "Province No. 7"
    #[arg(long)]
    pub province: Option<String>,
    /// Country (defaults to the configured home country)
    #[arg(long)]
    pub country: Option<String>,
    /// PNG file to use as the profile picture
    #[arg(long)]
    pub picture: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only show records with a field containing this text (case-insensitive)
    #[arg(long)]
    pub search: Option<String>,
    /// 1-based page to print
    #[arg(long, default_value_t = 1)]
    pub page: usize,
    /// Print every record with full details instead of one page
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RemoveArgs {
    /// 0-based position of the record in the full list
    pub index: usize,
}

pub fn run_tui(config: Arc<AppConfig>, store: RecordStore<StorageHandle>) -> Result<()> {
    let countries = CountryList::new();
    countries::spawn_fetch(config.countries.clone(), countries.clone());
    let mut app = App::new(config, store, countries);
    app.run()
}

pub fn add_record(
    config: Arc<AppConfig>,
    mut store: RecordStore<StorageHandle>,
    mut args: AddArgs,
) -> Result<()> {
    if atty::is(atty::Stream::Stdin) {
        fill_missing_interactively(&mut args)?;
    }
    let output = run_add(&config, &mut store, args)?;
    print!("{output}");
    Ok(())
}

pub fn list_records(
    config: Arc<AppConfig>,
    store: RecordStore<StorageHandle>,
    args: ListArgs,
) -> Result<()> {
    print!("{}", run_list(&config, &store, &args));
    Ok(())
}

pub fn remove_record(mut store: RecordStore<StorageHandle>, args: RemoveArgs) -> Result<()> {
    let output = run_remove(&mut store, &args)?;
    print!("{output}");
    Ok(())
}

fn fill_missing_interactively(args: &mut AddArgs) -> Result<()> {
    for (slot, label) in [
        (&mut args.name, Field::Name.label()),
        (&mut args.email, Field::Email.label()),
        (&mut args.phone, Field::PhoneNumber.label()),
    ] {
        if slot.is_none() {
            *slot = Some(prompt(label)?);
        }
    }
    Ok(())
}

fn run_add<S: KeyValueStore>(
    config: &AppConfig,
    store: &mut RecordStore<S>,
    args: AddArgs,
) -> Result<String> {
    let mut form = EntryForm::new(config.form.default_country.clone());
    let values = [
        (Field::Name, args.name),
        (Field::Email, args.email),
        (Field::PhoneNumber, args.phone),
        (Field::Dob, args.dob),
        (Field::City, args.city),
        (Field::District, args.district),
        (Field::Province, args.province),
        (Field::Country, args.country),
    ];
    for (field, value) in values {
        if let Some(value) = value {
            form.change_field(field, value);
        }
    }
    if let Some(path) = args.picture {
        let file = PictureFile::probe(&path).unwrap_or_else(|_| PictureFile::new(&path));
        form.attach_picture(file);
    }

    match form.submit(store)? {
        SubmitOutcome::Added { index } => {
            let name = store
                .get(index)
                .map(|record| record.name.clone())
                .unwrap_or_default();
            Ok(format!("Added record #{index} ({name})\n"))
        }
        SubmitOutcome::Rejected(errors) => {
            let mut message = String::from("record rejected:");
            for (field, error) in errors.iter() {
                let _ = write!(&mut message, "\n  {}: {error}", field.label());
            }
            bail!(message)
        }
        SubmitOutcome::PictureUnreadable(err) => {
            Err(err).context("attaching profile picture")
        }
    }
}

fn run_list<S: KeyValueStore>(config: &AppConfig, store: &RecordStore<S>, args: &ListArgs) -> String {
    if args.all {
        return format_profiles(store.records());
    }
    let mut view = TableView::new(config.table.page_size, config.table.page_reset);
    if let Some(term) = &args.search {
        view.set_search_term(term.clone());
    }
    view.set_page(args.page);
    format_table_page(&view.render(store.records()))
}

fn run_remove<S: KeyValueStore>(store: &mut RecordStore<S>, args: &RemoveArgs) -> Result<String> {
    match store.remove(args.index).context("removing record")? {
        Some(record) => Ok(format!("Removed record #{} ({})\n", args.index, record.name)),
        None => bail!(
            "no record at index {} (the list has {} record(s))",
            args.index,
            store.len()
        ),
    }
}

pub fn format_table_page(page: &TablePage<'_>) -> String {
    if page.total_matches == 0 {
        return "No records found.\n".to_string();
    }
    let mut out = String::new();
    if page.is_empty() {
        let _ = writeln!(
            &mut out,
            "Page {} is empty ({} page(s) available).",
            page.page, page.total_pages
        );
        return out;
    }
    for row in &page.rows {
        let record = row.record;
        let _ = writeln!(&mut out, "#{}  {}", row.index, record.name);
        let _ = writeln!(
            &mut out,
            "    {}  {}  {}",
            record.email, record.phone_number, record.country
        );
    }
    let _ = writeln!(
        &mut out,
        "Page {}/{} · {} match(es)",
        page.page, page.total_pages, page.total_matches
    );
    out
}

fn format_profiles(records: &[Record]) -> String {
    if records.is_empty() {
        return "No records found.\n".to_string();
    }
    let mut out = String::new();
    for (index, record) in records.iter().enumerate() {
        let _ = writeln!(&mut out, "#{index}  {}", record.name);
        for field in Field::all().into_iter().skip(1) {
            let value = match field {
                Field::ProfilePicture if record.has_picture() => "PNG attached".to_string(),
                _ => record.field_text(field),
            };
            if !value.is_empty() {
                let _ = writeln!(&mut out, "    {:<15} {value}", field.label());
            }
        }
        out.push('\n');
    }
    out
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::{ConfigPaths, StorageOptions};
    use crate::picture::PNG_SIGNATURE;
    use crate::storage;
    use tempfile::TempDir;

    type TestResult<T = ()> = Result<T>;

    fn setup_store() -> TestResult<(TempDir, RecordStore<StorageHandle>)> {
        let temp = TempDir::new().context("creating temp dir")?;
        let paths = ConfigPaths::rooted(temp.path());
        let mut storage_opts = StorageOptions::default();
        storage_opts.database_path = paths.database_path.clone();
        let handle = storage::init(&paths, &storage_opts)?;
        let store = RecordStore::load(handle)?;
        Ok((temp, store))
    }

    fn add_args(name: &str, country: &str) -> AddArgs {
        AddArgs {
            name: Some(name.into()),
            email: Some(format!("{}@example.com", name.to_lowercase())),
            phone: Some("9801234567".into()),
            country: Some(country.into()),
            ..AddArgs::default()
        }
    }

    #[test]
    fn cli_add_persists_a_valid_record() -> TestResult {
        let (_temp, mut store) = setup_store()?;
        let config = AppConfig::default();
        let output = run_add(&config, &mut store, add_args("Sunita", "Nepal"))?;
        assert_eq!(output, "Added record #0 (Sunita)\n");

        let reloaded = RecordStore::load(store.storage().clone())?;
        assert_eq!(reloaded.len(), 1);
        Ok(())
    }

    #[test]
    fn cli_add_reports_every_invalid_field() -> TestResult {
        let (_temp, mut store) = setup_store()?;
        let config = AppConfig::default();
        let args = AddArgs {
            email: Some("foo".into()),
            phone: Some("12345".into()),
            ..AddArgs::default()
        };
        let err = run_add(&config, &mut store, args).expect_err("record is invalid");
        let message = err.to_string();
        assert!(message.contains("Name: Name is required"));
        assert!(message.contains("Email: Email is invalid"));
        assert!(message.contains("Phone Number: Phone number is invalid"));
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn cli_add_uses_configured_home_country() -> TestResult {
        let (_temp, mut store) = setup_store()?;
        let mut config = AppConfig::default();
        config.form.default_country = "Bhutan".into();
        let mut args = add_args("Karma", "ignored");
        args.country = None;
        run_add(&config, &mut store, args)?;
        assert_eq!(store.get(0).map(|r| r.country.as_str()), Some("Bhutan"));
        Ok(())
    }

    #[test]
    fn cli_add_encodes_picture() -> TestResult {
        let (temp, mut store) = setup_store()?;
        let path = temp.path().join("me.png");
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(b"\0\0\0\rIHDR");
        fs::write(&path, &bytes)?;

        let mut args = add_args("Pic", "Nepal");
        args.picture = Some(path);
        run_add(&AppConfig::default(), &mut store, args)?;
        assert!(store.get(0).map(Record::has_picture).unwrap_or(false));
        Ok(())
    }

    #[test]
    fn cli_list_searches_and_paginates() -> TestResult {
        let (_temp, mut store) = setup_store()?;
        let config = AppConfig::default();
        for i in 0..6 {
            run_add(&config, &mut store, add_args(&format!("Nep{i}"), "Nepal"))?;
        }
        run_add(&config, &mut store, add_args("Arjun", "India"))?;

        let output = run_list(
            &config,
            &store,
            &ListArgs {
                search: Some("INDIA".into()),
                page: 1,
                all: false,
            },
        );
        assert!(output.contains("#6  Arjun"));
        assert!(!output.contains("Nep0"));

        let output = run_list(
            &config,
            &store,
            &ListArgs {
                search: None,
                page: 2,
                all: false,
            },
        );
        assert!(output.contains("#5  Nep5"));
        assert!(output.contains("#6  Arjun"));
        assert!(output.contains("Page 2/2 · 7 match(es)"));
        Ok(())
    }

    #[test]
    fn cli_list_all_prints_every_profile() -> TestResult {
        let (_temp, mut store) = setup_store()?;
        let config = AppConfig::default();
        let mut args = add_args("Maya", "Nepal");
        args.city = Some("Dharan".into());
        run_add(&config, &mut store, args)?;

        let output = run_list(
            &config,
            &store,
            &ListArgs {
                search: None,
                page: 1,
                all: true,
            },
        );
        assert!(output.contains("#0  Maya"));
        assert!(output.contains("Dharan"));
        assert!(!output.contains("Profile Picture"));
        Ok(())
    }

    #[test]
    fn cli_remove_deletes_by_full_list_index() -> TestResult {
        let (_temp, mut store) = setup_store()?;
        let config = AppConfig::default();
        for name in ["A", "B", "C"] {
            run_add(&config, &mut store, add_args(name, "Nepal"))?;
        }
        let output = run_remove(&mut store, &RemoveArgs { index: 1 })?;
        assert_eq!(output, "Removed record #1 (B)\n");
        assert!(run_remove(&mut store, &RemoveArgs { index: 9 }).is_err());
        assert_eq!(store.len(), 2);
        Ok(())
    }
}
