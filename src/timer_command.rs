use anyhow::{Context, Result};
use log::info;

use crate::console::ConsolePresenter;
use crate::engine::{SharedTimer, StartInput};
use crate::time_entry::EntryType;

/// `start`サブコマンドの引数を表す構造体。
#[derive(Debug, clap::Args)]
pub struct StartArgs {
    #[clap(short = 'p', long = "project", help = "Project to track time on")]
    project: String,

    #[clap(short = 't', long = "task", help = "Task within the project")]
    task: Option<String>,

    #[clap(short = 'd', long = "description", help = "What you are working on")]
    description: Option<String>,

    #[clap(
        long = "type",
        help = "Entry type: normal, manual, pomodoro or non-billable"
    )]
    entry_type: Option<EntryType>,

    #[clap(long = "tag", help = "Tag to attach, may be repeated")]
    tags: Vec<String>,
}

/// `status`サブコマンドの引数を表す構造体。
#[derive(Debug, clap::Args)]
pub struct StatusArgs {
    #[clap(short = 'w', long = "watch", help = "Keep printing the timer on every tick")]
    watch: bool,
}

/// `describe`サブコマンドの引数を表す構造体。
#[derive(Debug, clap::Args)]
pub struct DescribeArgs {
    #[clap(short = 'd', long = "description", help = "New description")]
    description: Option<String>,

    #[clap(long = "tag", help = "Replace the tags, may be repeated")]
    tags: Vec<String>,
}

/// タイマーを操作するサブコマンド。
#[derive(Debug, clap::Subcommand)]
pub enum TimerAction {
    /// Start a new timer, stopping the current one first
    Start(StartArgs),
    /// Pause the running timer
    Pause,
    /// Resume the paused timer
    Resume,
    /// Stop the timer and record its duration
    Stop,
    /// Show the current timer
    Status(StatusArgs),
    /// Change the description or tags of the current timer
    Describe(DescribeArgs),
}

pub struct TimerCommand<'a> {
    timer: &'a SharedTimer,
    owner_id: &'a str,
}

impl<'a> TimerCommand<'a> {
    /// 新しい`TimerCommand`を返す。
    ///
    /// # Arguments
    /// * `timer` - 操作するタイマー
    /// * `owner_id` - 計測するユーザー
    pub fn new(timer: &'a SharedTimer, owner_id: &'a str) -> Self {
        Self { timer, owner_id }
    }

    /// サブコマンドの処理を行う。
    ///
    /// 前回のプロセスで計測中だったtime entryを復元してからコマンドを実行し、
    /// 終了前にバックグラウンドの書き込みを待つ。
    ///
    /// # Arguments
    ///
    /// * `action` - 実行するサブコマンド
    /// * `presenter` - 結果を表示するためのpresenter
    pub async fn run<P: ConsolePresenter>(&self, action: TimerAction, presenter: &mut P) -> Result<()> {
        self.timer
            .load(self.owner_id)
            .await
            .context("Failed to restore the running timer")?;

        match action {
            TimerAction::Start(args) => {
                let input = StartInput {
                    project_id: Some(args.project),
                    task_id: args.task,
                    description: args.description,
                    entry_type: args.entry_type,
                    tags: args.tags.into_iter().collect(),
                };
                let id = self
                    .timer
                    .start(self.owner_id, input)
                    .await
                    .context("Failed to start the timer")?;
                info!("Timer started: {}", id);
                presenter.show_snapshot(&self.timer.snapshot())?;
            }
            TimerAction::Pause => {
                if !self.timer.pause().await {
                    info!("Timer is not running, nothing to pause.");
                }
                presenter.show_snapshot(&self.timer.snapshot())?;
            }
            TimerAction::Resume => {
                if !self.timer.resume().await {
                    info!("Timer is not paused, nothing to resume.");
                }
                presenter.show_snapshot(&self.timer.snapshot())?;
            }
            TimerAction::Stop => {
                let finalized = self
                    .timer
                    .stop()
                    .await
                    .context("Failed to stop the timer")?;
                presenter.show_finalized(finalized.as_ref())?;
            }
            TimerAction::Status(args) => {
                presenter.show_snapshot(&self.timer.snapshot())?;
                if args.watch {
                    self.watch(presenter).await?;
                }
            }
            TimerAction::Describe(args) => {
                let tags = (!args.tags.is_empty()).then(|| args.tags.into_iter().collect());
                self.timer
                    .update_details(args.description, tags)
                    .await
                    .context("Failed to update the timer")?;
                presenter.show_snapshot(&self.timer.snapshot())?;
            }
        }

        self.timer.settle().await;

        Ok(())
    }

    /// Ctrl-Cが押されるまでtickごとに状態を表示する。
    async fn watch<P: ConsolePresenter>(&self, presenter: &mut P) -> Result<()> {
        let mut snapshots = self.timer.subscribe();
        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    presenter.show_snapshot(&snapshot)?;
                }
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for Ctrl-C")?;
                    return Ok(());
                }
            }
        }
    }
}
