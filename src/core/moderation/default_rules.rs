// Stock rule set seeded into a fresh installation.

use super::moderation_models::{Rule, RuleKind, Severity};

/// The stock rules, in seeding order.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new("Contenu Toxique - Insultes", RuleKind::Toxicity)
            .with_description("Detecte les insultes et le langage toxique en francais")
            .with_keywords([
                "con",
                "connard",
                "salope",
                "pute",
                "merde",
                "putain",
                "batard",
                "encule",
                "fils de pute",
                "ta gueule",
                "ferme-la",
                "debile",
                "cretin",
                "abruti",
                "idiot de merde",
                "espece de con",
            ])
            .with_patterns([
                r"\b(?:con+ard|sal[eo]pe?|put[ea]|merde|chier|foutre)\b",
                r"\b(?:ferme\s+ta\s+gueule|va\s+te\s+faire)\b",
                r"(?:espece\s+de?|sale)\s+(?:con|idiot|debile)",
            ])
            .with_threshold(0.7)
            .with_auto_block(true)
            .with_severity(Severity::High),
        Rule::new("Harcelement et Menaces", RuleKind::Pattern)
            .with_description("Detecte les menaces et le harcelement")
            .with_keywords([
                "je vais te tuer",
                "tu vas mourir",
                "je te connais",
                "attention a toi",
                "tu me le paieras",
                "je sais ou tu habites",
                "tu vas le regretter",
            ])
            .with_patterns([
                r"(?:je\s+vais\s+te|tu\s+vas)\s+(?:tuer|buter|defoncer|exploser)",
                r"(?:je\s+te\s+connais|je\s+sais\s+ou\s+tu)",
                r"(?:attention\s+a\s+toi|tu\s+me\s+le\s+paieras)",
                r"(?:tu\s+vas\s+le\s+regretter|je\s+vais\s+te\s+retrouver)",
            ])
            .with_threshold(0.9)
            .with_auto_block(true)
            .with_severity(Severity::Critical),
        Rule::new("Contenu Sexuel Inapproprie", RuleKind::Keyword)
            .with_description("Detecte le contenu sexuel explicite inapproprie")
            .with_keywords([
                "sexe",
                "nude",
                "nue",
                "penis",
                "vagin",
                "seins nus",
                "porn",
                "porno",
                "masturbation",
                "orgasme",
                "ejaculation",
                "fellation",
            ])
            .with_patterns([
                r"\b(?:sexe|porn|nude|nue)\b",
                r"(?:seins?\s+nus?|penis|vagin)",
                r"(?:masturb|orgasm|ejacul|fellat)",
            ])
            .with_threshold(0.6)
            .with_severity(Severity::Medium),
        Rule::new("Spam Commercial", RuleKind::Spam)
            .with_description("Detecte le spam et la publicite non autorisee")
            .with_keywords([
                "achetez maintenant",
                "offre limitee",
                "gratuit",
                "promotion",
                "visitez notre site",
                "cliquez ici",
                "argent facile",
                "devenez riche",
            ])
            .with_patterns([
                r"(?:https?://|www\.)\S+",
                r"(?:achetez|vendez|gratuit|promotion|offre\s+speciale)",
                r"(?:contactez|appelez|envoyez|email)",
                r"(?:argent\s+facile|devenez\s+riche|opportunite\s+unique)",
            ])
            .with_threshold(0.5)
            .with_severity(Severity::Low),
        Rule::new("Discrimination et Racisme", RuleKind::Pattern)
            .with_description("Detecte les propos discriminatoires et racistes")
            .with_keywords([
                "sale arabe",
                "sale noir",
                "sale juif",
                "sale blanc",
                "negro",
                "bougnoule",
                "raton",
                "youpin",
                "bamboula",
                "chinois",
                "bride",
            ])
            .with_patterns([
                r"(?:sale|espece\s+de)\s+(?:arabe|noir|juif|blanc)",
                r"\b(?:negro|bougnoule|raton|youpin|bamboula)\b",
                r"(?:bride|chinois\s+de\s+merde|sale\s+asiat)",
                r"(?:retourne\s+(?:dans\s+ton|chez\s+toi)|on\s+est\s+chez\s+nous)",
            ])
            .with_threshold(0.8)
            .with_auto_block(true)
            .with_severity(Severity::Critical),
        Rule::new("Sentiment Tres Negatif", RuleKind::Sentiment)
            .with_description("Detecte un sentiment excessivement negatif dans les commentaires")
            .with_keywords([
                "nul",
                "horrible",
                "catastrophique",
                "deteste",
                "horreur",
                "pourri",
                "decevant",
                "waste of time",
                "perte de temps",
            ])
            .with_threshold(0.8)
            .with_severity(Severity::Low),
        Rule::new("Informations Personnelles", RuleKind::Pattern)
            .with_description("Detecte le partage d informations personnelles sensibles")
            .with_category("Informations personnelles")
            .with_patterns([
                r"\b\d{10,}\b",
                r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b",
                r"\b\d{4}\s?\d{4}\s?\d{4}\s?\d{4}\b",
                r"(?:mon\s+numero|appelle\s+moi|contacte\s+moi)\s*:?\s*\d+",
                r"(?:adresse|j\s+habite)\s*:?\s*\d+.*(?:rue|avenue|boulevard)",
            ])
            .with_threshold(0.7)
            .with_severity(Severity::Medium),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::rule_evaluator::{evaluate, validate_pattern};
    use std::collections::HashSet;

    #[test]
    fn test_default_rules_are_valid() {
        let rules = default_rules();
        assert_eq!(rules.len(), 7);

        let names: HashSet<_> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names.len(), rules.len());

        for rule in &rules {
            assert!((0.0..=1.0).contains(&rule.threshold), "{}", rule.name);
            for pattern in &rule.patterns {
                assert!(validate_pattern(pattern).is_ok(), "{}: {}", rule.name, pattern);
            }
        }
    }

    #[test]
    fn test_default_rules_catch_examples() {
        let rules = default_rules();
        let find = |name: &str| rules.iter().find(|r| r.name == name).unwrap();

        assert!(evaluate(find("Contenu Toxique - Insultes"), "c'est de la merde!").violated);
        assert!(evaluate(find("Informations Personnelles"), "mon email test@example.com").violated);
        assert!(
            evaluate(
                find("Spam Commercial"),
                "ACHETEZ MAINTENANT!!! OFFRE LIMITEE!!! CLIQUEZ ICI!!!"
            )
            .violated
        );
        assert!(
            !evaluate(
                find("Harcelement et Menaces"),
                "Ce cours est vraiment excellent! J'ai beaucoup appris."
            )
            .violated
        );
    }
}
