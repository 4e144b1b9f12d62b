use anyhow::Context;
use clap::{Parser, Subcommand};
use medbot_client::{
    ApiClient, ChannelPushClient, ChatController, FormController, FormInput, ImageFile, NewCase,
    render::Locale,
};
use medbot_core::Difficulty;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "medbot", about = "Command-line client for the Medical AI Bot server")]
struct Cli {
    /// Server address
    #[arg(long, env = "MEDBOT_URL", default_value = "http://localhost:4001")]
    base_url: String,

    /// Language of rendered results (en or ar)
    #[arg(long, env = "MEDBOT_LANG", default_value = "en")]
    lang: Locale,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze an image and/or a text description
    Analyze {
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long, default_value = "")]
        text: String,
        #[arg(long)]
        speciality: Option<String>,
        /// Print the results as an HTML fragment
        #[arg(long)]
        html: bool,
    },
    /// Ask the general medical AI
    AskAi { question: String },
    /// Ask a question within a speciality
    Ask {
        question: String,
        #[arg(long)]
        speciality: String,
    },
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        speciality: String,
    },
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Add a training case
    AddCase {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        speciality: String,
        /// One step; repeat for several
        #[arg(long = "step", required = true)]
        steps: Vec<String>,
        #[arg(long)]
        correct_answer: String,
        #[arg(long)]
        difficulty: Option<Difficulty>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Interactive chat with the medical AI, one question per line
    Chat,
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "medbot_client=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let client = ApiClient::new(cli.base_url);

    match cli.command {
        Command::Analyze {
            image,
            text,
            speciality,
            html,
        } => {
            let image = match image {
                Some(path) => Some(ImageFile::read(&path).await?),
                None => None,
            };
            let mut form = FormController::new(client).with_locale(cli.lang);
            form.submit(FormInput {
                image,
                text,
                speciality,
            })
            .await
            .context("analysis failed")?;
            if html {
                println!("{}", form.render_html());
            } else {
                println!("{}", form.render_plain());
            }
        }
        Command::AskAi { question } => println!("{}", client.ask_ai(&question).await?),
        Command::Ask {
            question,
            speciality,
        } => println!("{}", client.ask(&question, &speciality).await?),
        Command::Register {
            name,
            email,
            password,
            speciality,
        } => println!(
            "{}",
            client.register(&name, &email, &password, &speciality).await?
        ),
        Command::Login { email, password } => println!("{}", client.login(&email, &password).await?),
        Command::AddCase {
            title,
            description,
            speciality,
            steps,
            correct_answer,
            difficulty,
            tags,
        } => {
            let id = client
                .add_case(&NewCase {
                    title,
                    description,
                    speciality,
                    steps,
                    correct_answer,
                    difficulty,
                    tags,
                })
                .await?;
            println!("Medical case added: {id}");
        }
        Command::Chat => chat(client).await?,
    }

    Ok(())
}

async fn chat(client: ApiClient) -> anyhow::Result<()> {
    // No remote push source exists yet; the channel stays open for embedders.
    let (_sender, push) = ChannelPushClient::channel(64);
    let mut chat = ChatController::new(client, Box::new(push));
    chat.connect().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        match chat.ask(question).await {
            Ok(answer) => println!("{answer}"),
            Err(e) => eprintln!("error: {e}"),
        }
        for message in chat.poll_pushed()? {
            println!("[push] {message}");
        }
    }

    chat.disconnect().await;
    Ok(())
}
