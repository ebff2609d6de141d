// Property tests for the MibScript tokenizer

use mibscript::tokenizer::tokenize;
use proptest::prelude::*;

fn lexeme() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z_][a-z0-9_]{0,8}",
        "[0-9]{1,6}",
        prop::sample::select(vec![
            "<<=", ">>=", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+=", "-=", "::", "<",
            ">", "=", "!", "+", "-", "*", "%", "&", "|", "^", "?", ":", ";", ",", ".", "(", ")",
            "{", "}",
        ])
        .prop_map(str::to_string),
    ]
}

proptest! {
    #[test]
    fn retokenizing_joined_texts_is_stable(lexemes in prop::collection::vec(lexeme(), 0..40)) {
        let source = lexemes.join(" ");
        let first = tokenize(&source);
        prop_assert!(!first.has_errors());
        let texts: Vec<String> = first.texts().into_iter().map(str::to_string).collect();
        prop_assert_eq!(&texts, &lexemes);

        let second = tokenize(&texts.join(" "));
        prop_assert_eq!(second.texts(), first.texts());
    }

    #[test]
    fn printable_input_never_panics(source in "[ -~\n]{0,80}") {
        let stream = tokenize(&source);
        for token in &stream.tokens {
            prop_assert!(token.line >= 1);
            prop_assert!(token.column >= 1);
        }
    }
}
