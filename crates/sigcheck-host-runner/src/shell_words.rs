use serde::Serialize;

/// Splits a flags string into words the way a POSIX shell does for plain word
/// splitting: quotes group, backslash escapes (except inside single quotes), and
/// nothing is expanded. An unterminated quote is closed at end of input, and a
/// backslash with nothing after it is kept as a literal `\`.
pub fn split_flags(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut backslash = false;

    for c in s.chars() {
        if backslash {
            word.push(c);
            backslash = false;
            continue;
        }
        match quote {
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            None => {
                in_word = true;
                match c {
                    '\'' | '"' => quote = Some(c),
                    '\\' => backslash = true,
                    _ => word.push(c),
                }
            }
            Some(q) if c == q => quote = None,
            Some('"') if c == '\\' => backslash = true,
            Some(_) => word.push(c),
        }
    }

    if backslash {
        word.push('\\');
    }
    if in_word {
        words.push(word);
    }
    words
}

/// A compiler command line: program followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompilerInvocation {
    argv: Vec<String>,
}

impl CompilerInvocation {
    pub fn new(compiler: impl Into<String>, flags: &str) -> Self {
        let mut argv = vec![compiler.into()];
        argv.extend(split_flags(flags));
        Self { argv }
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Returns a new invocation with `more` appended; `self` is left untouched.
    pub fn extended<I, S>(&self, more: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = self.argv.clone();
        argv.extend(more.into_iter().map(Into::into));
        Self { argv }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_round_trip() {
        let input = "-fPIC -m64 -pthread -fmessage-length=0";
        let words = split_flags(input);
        let expected: Vec<&str> = input.split(' ').collect();
        assert_eq!(words, expected);
    }

    #[test]
    fn quoted_space_stays_in_one_word() {
        assert_eq!(split_flags(r#""-o" "a b""#), vec!["-o", "a b"]);
    }

    #[test]
    fn empty_and_blank_inputs_yield_nothing() {
        assert!(split_flags("").is_empty());
        assert!(split_flags("   \t \n ").is_empty());
    }

    #[test]
    fn consecutive_whitespace_does_not_produce_empty_words() {
        assert_eq!(split_flags("  -a   -b\t\t-c  "), vec!["-a", "-b", "-c"]);
    }

    #[test]
    fn single_quotes_keep_backslashes() {
        assert_eq!(split_flags(r"'a\ b' c"), vec![r"a\ b", "c"]);
    }

    #[test]
    fn backslash_escapes_outside_and_inside_double_quotes() {
        assert_eq!(split_flags(r"a\ b"), vec!["a b"]);
        assert_eq!(split_flags(r#""say \"hi\"""#), vec![r#"say "hi""#]);
        assert_eq!(split_flags(r"\'x"), vec!["'x"]);
    }

    #[test]
    fn quotes_join_adjacent_text() {
        assert_eq!(
            split_flags(r#"-DNAME="two words"x next"#),
            vec!["-DNAME=two wordsx", "next"]
        );
    }

    #[test]
    fn empty_quotes_make_an_empty_word() {
        assert_eq!(split_flags(r#"a "" b"#), vec!["a", "", "b"]);
    }

    #[test]
    fn unterminated_quote_closes_at_end() {
        assert_eq!(split_flags(r#"-x "open ended"#), vec!["-x", "open ended"]);
        assert_eq!(split_flags("-y 'still open"), vec!["-y", "still open"]);
    }

    #[test]
    fn dangling_backslash_is_kept_literally() {
        assert_eq!(split_flags(r"abc\"), vec![r"abc\"]);
        assert_eq!(split_flags("\\"), vec!["\\"]);
        assert_eq!(split_flags(r"-a \"), vec!["-a", r"\"]);
        assert_eq!(split_flags(r#""q\"#), vec![r"q\"]);
    }

    #[test]
    fn invocation_prefixes_compiler_and_extends_without_mutation() {
        let base = CompilerInvocation::new("gcc", "-fPIC -m64");
        assert_eq!(base.program(), "gcc");
        assert_eq!(base.args(), ["-fPIC", "-m64"]);

        let full = base.extended(["-o", "testp", "main.c"]);
        assert_eq!(
            full.argv(),
            ["gcc", "-fPIC", "-m64", "-o", "testp", "main.c"]
        );
        assert_eq!(base.argv().len(), 3);
    }
}
