#[cfg(test)]
mod lexer_tests {
    use crate::error::ErrorKind;
    use crate::lexer::token::TokenKind;
    use crate::lexer::tokenize;

    fn lex_ok(input: &str) -> Vec<TokenKind> {
        let result = tokenize("test.bfl", input);
        assert!(
            result.errors.is_empty(),
            "Unexpected errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|t| t.kind).collect()
    }

    fn lex_errors(input: &str) -> Vec<ErrorKind> {
        let result = tokenize("test.bfl", input);
        result.errors.into_iter().map(|e| e.kind).collect()
    }

    #[test]
    fn empty_input() {
        assert_eq!(lex_ok(""), vec![TokenKind::Eof]);
    }

    #[test]
    fn whitespace_only() {
        assert_eq!(lex_ok("  \t\n\n  "), vec![TokenKind::Eof]);
    }

    #[test]
    fn comment_only() {
        assert_eq!(lex_ok("// nothing here\n"), vec![TokenKind::Eof]);
    }

    #[test]
    fn comment_does_not_eat_next_line() {
        assert_eq!(
            lex_ok("// comment\nx"),
            vec![TokenKind::Ident("x".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn all_keywords() {
        let kinds = lex_ok("type if else while return input output inline exit signed");
        assert_eq!(
            kinds,
            vec![
                TokenKind::KwType,
                TokenKind::KwIf,
                TokenKind::KwElse,
                TokenKind::KwWhile,
                TokenKind::KwReturn,
                TokenKind::KwInput,
                TokenKind::KwOutput,
                TokenKind::KwInline,
                TokenKind::KwExit,
                TokenKind::KwSigned,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn keywords_are_case_sensitive() {
        assert_eq!(
            lex_ok("If WHILE"),
            vec![
                TokenKind::Ident("If".into()),
                TokenKind::Ident("WHILE".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn punctuation() {
        let kinds = lex_ok("{ } ( ) , ; . = + - * / ->");
        assert_eq!(
            kinds,
            vec![
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Comma,
                TokenKind::Semicolon,
                TokenKind::Dot,
                TokenKind::Assign,
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Arrow,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn arrow_vs_minus() {
        assert_eq!(
            lex_ok("->-"),
            vec![TokenKind::Arrow, TokenKind::Minus, TokenKind::Eof]
        );
    }

    #[test]
    fn bare_gt_is_an_error() {
        assert_eq!(lex_errors(">"), vec![ErrorKind::UnexpectedCharacter]);
    }

    #[test]
    fn integer_literal() {
        assert_eq!(lex_ok("65"), vec![TokenKind::Int(65), TokenKind::Eof]);
        assert_eq!(lex_ok("0"), vec![TokenKind::Int(0), TokenKind::Eof]);
    }

    #[test]
    fn identifiers() {
        assert_eq!(
            lex_ok("x _tmp Pair p2"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Ident("_tmp".into()),
                TokenKind::Ident("Pair".into()),
                TokenKind::Ident("p2".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn string_literal_plain() {
        assert_eq!(
            lex_ok("\"Hi\""),
            vec![TokenKind::Str("Hi".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn string_known_escapes() {
        assert_eq!(
            lex_ok(r#""a\nb\tc\rd\\e""#),
            vec![TokenKind::Str("a\nb\tc\rd\\e".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn string_unknown_escape_verbatim() {
        // An unrecognized escape reproduces the following character.
        assert_eq!(
            lex_ok(r#""a\qb""#),
            vec![TokenKind::Str("aqb".into()), TokenKind::Eof]
        );
        assert_eq!(
            lex_ok(r#""say \"hi\"""#),
            vec![TokenKind::Str("say \"hi\"".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn string_unterminated() {
        assert_eq!(lex_errors("\"oops"), vec![ErrorKind::UnterminatedString]);
        assert_eq!(lex_errors("\"oops\nx\""), vec![ErrorKind::UnterminatedString]);
    }

    #[test]
    fn spans_track_lines() {
        let result = tokenize("test.bfl", "x\n  y");
        assert_eq!(result.tokens[0].span.line, 1);
        assert_eq!(result.tokens[1].span.line, 2);
        assert_eq!(result.tokens[1].span.col, 3);
    }

    #[test]
    fn small_program() {
        let kinds = lex_ok("main() { output 65; }");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("main".into()),
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::LBrace,
                TokenKind::KwOutput,
                TokenKind::Int(65),
                TokenKind::Semicolon,
                TokenKind::RBrace,
                TokenKind::Eof
            ]
        );
    }
}
