use crate::diagnosis::types::{Decision, Diagnosis};
use crate::explain::region::RegionLabel;

pub const DISCLAIMER: &str = "Note: this result is a decision-support aid only and is not a clinical \
determination; the final diagnosis must be made by a qualified specialist.";

/// 固定模板的说明文本，恶性/良性两套模板，结尾总是附带免责声明
pub fn compose(decision: &Decision, region: RegionLabel) -> String {
    let confidence = decision.confidence * 100.0;
    let body = match decision.diagnosis {
        Diagnosis::Hemorrhage => format!(
            "Finding: suspected intracranial hemorrhage (confidence {:.1}%).\n\
             Primary region of interest: {}.\n\
             Analysis: the areas highlighted in red show high-density patterns \
             consistent with hemorrhage.",
            confidence, region
        ),
        Diagnosis::Normal => format!(
            "Finding: no hemorrhage detected (confidence {:.1}%).\n\
             Primary region of interest: {}.\n\
             Analysis: no findings suggestive of hemorrhage were identified. \
             If clinical symptoms are present, specialist consultation is recommended.",
            confidence, region
        ),
    };

    format!("{}\n\n{}", body, DISCLAIMER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecisionConfig;
    use crate::explain::region::{Horizontal, Vertical};

    #[test]
    fn templates_differ_and_carry_disclaimer() {
        let config = DecisionConfig::default();
        let region = RegionLabel::Zone(Horizontal::Left, Vertical::Top);

        let concerning = compose(&Decision::from_output(0.873, &config), region);
        assert!(concerning.contains("suspected intracranial hemorrhage"));
        assert!(concerning.contains("87.3%"));
        assert!(concerning.contains("left frontal lobe"));
        assert!(concerning.ends_with(DISCLAIMER));

        let benign = compose(&Decision::from_output(0.1, &config), RegionLabel::WholeRegion);
        assert!(benign.contains("no hemorrhage detected"));
        assert!(benign.contains("90.0%"));
        assert!(benign.contains("whole region"));
        assert!(benign.ends_with(DISCLAIMER));
    }
}
