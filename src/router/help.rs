//! Localized `help` output

const HELP_EN: &str = "\
Dockhand command reference

Prefixes:
  code: <command>            run a shell command in the project
  file:read <path>           print a file
  file:list [dir]            list a directory
  file:write <path> <text>   create or overwrite a file
  file:delete <path>         delete a file
  git: <args>                run git (defaults to `git status`)
  info: [status|disk|memory|env]
                             show environment information
  help: or help              show this text

Examples:
  code: ls -la
  file:read README.md
  git: status
  info:disk
  Create a React component   (no prefix: sent to the assistant)

Plain shell commands such as `ls -la` or `npm test` run directly.
Anything else is answered by the assistant; file changes it proposes
need your approval.";

const HELP_JA: &str = "\
Dockhand コマンド一覧

プレフィックス:
  code: <コマンド>             プロジェクト内でシェルコマンドを実行
  file:read <パス>             ファイルを表示
  file:list [ディレクトリ]     ディレクトリを一覧表示
  file:write <パス> <内容>     ファイルを作成または上書き
  file:delete <パス>           ファイルを削除
  git: <引数>                  git を実行 (省略時は `git status`)
  info: [status|disk|memory|env]
                               環境情報を表示
  help: または help            このヘルプを表示

使用例:
  code: ls -la
  file:read README.md
  git: status
  info:disk
  PythonでWebアプリを作って    (プレフィックスなし: アシスタントへ送信)

`ls -la` や `npm test` のようなシェルコマンドはそのまま実行されます。
それ以外はアシスタントが応答し、ファイル変更には承認が必要です。";

/// Help text for a session language; anything but `ja` gets English.
pub fn help_text(language: &str) -> String {
    match language {
        "ja" => HELP_JA.to_string(),
        _ => HELP_EN.to_string(),
    }
}
